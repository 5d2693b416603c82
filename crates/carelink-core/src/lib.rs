// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Carelink session orchestrator.
//!
//! This crate provides the foundational trait definitions, error type, and
//! domain types used throughout the Carelink workspace. The session state
//! machine, collection pipeline, stores, and gateway all build on the
//! seams defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::CarelinkError;
pub use types::{Session, SessionStatus, SessionView};

// Re-export all adapter traits at crate root.
pub use traits::{
    HospitalStore, IdentityProvider, PatientStore, PipelineSpawner, ResolveIdentity,
    SessionStore,
};
