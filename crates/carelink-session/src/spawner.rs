// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Production pipeline spawner backed by the tokio runtime.

use futures::future::BoxFuture;

use carelink_core::PipelineSpawner;

/// Spawns pipeline tasks onto the ambient tokio runtime, detaching them
/// from the requesting connection's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl PipelineSpawner for TokioSpawner {
    fn submit(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}
