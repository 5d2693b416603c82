// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Carelink session orchestrator.

use thiserror::Error;

use crate::types::SessionStatus;

/// The primary error type used across all Carelink adapter traits and core operations.
///
/// Provider failures observed by the background collection pipeline are never
/// raised through this type across the session boundary -- they are recorded
/// as a state transition plus a human-readable session message. This enum
/// covers the synchronous surface (validation, lookups, storage, transport).
#[derive(Debug, Error)]
pub enum CarelinkError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad or missing client input. Rejected synchronously, no session mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested operation is already in flight for this session.
    ///
    /// Callers translate this into a success response carrying the current
    /// session view, so client retry loops never observe it as a failure.
    #[error("operation already in flight (session status: {status})")]
    Duplicate { status: SessionStatus },

    /// Unknown or expired session.
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// Identity-verification provider transport or protocol errors.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Session store backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Gateway transport errors (bind failure, serve failure).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors, including rejected state transitions.
    #[error("internal error: {0}")]
    Internal(String),
}
