// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing spawner: submitted pipeline tasks run only when the test
//! drains them, making detached collection deterministic.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;

use carelink_core::PipelineSpawner;

#[derive(Default)]
pub struct QueueSpawner {
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
    submitted: AtomicUsize,
}

impl QueueSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total tasks ever submitted, drained or not.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Runs every captured task to completion, including tasks submitted
    /// while draining.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                return;
            }
            for task in batch {
                task.await;
            }
        }
    }
}

impl PipelineSpawner for QueueSpawner {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(task);
    }
}
