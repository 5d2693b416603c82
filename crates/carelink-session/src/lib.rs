// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session orchestration: state machine, collection pipeline, push hub.
//!
//! The [`machine::SessionStateMachine`] owns every client-facing session
//! operation; the [`pipeline::CollectionPipeline`] runs detached after a
//! confirmed verification; the [`notify::NotificationHub`] pushes state
//! transitions to whichever WebSocket subscriber happens to be connected.

pub mod machine;
pub mod notify;
pub mod pipeline;
pub mod spawner;

pub use machine::{SessionSettings, SessionStateMachine};
pub use notify::{NotificationHub, Subscription};
pub use pipeline::CollectionPipeline;
pub use spawner::TokioSpawner;
