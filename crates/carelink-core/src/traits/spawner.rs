// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task-submission boundary for the background collection pipeline.

use futures::future::BoxFuture;

/// Submits the detached collection-pipeline task.
///
/// Production submits onto the tokio runtime so the HTTP response returns
/// before collection finishes; tests capture the future and drive it
/// inline, making the pipeline synchronous and deterministic.
pub trait PipelineSpawner: Send + Sync {
    fn submit(&self, task: BoxFuture<'static, ()>);
}
