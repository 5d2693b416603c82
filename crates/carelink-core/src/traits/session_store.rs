// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session store trait: keyed persistence of session documents with TTL.

use async_trait::async_trait;

use crate::error::CarelinkError;
use crate::types::Session;

/// Closure applied to a session inside an atomic read-modify-write.
///
/// Returning `Err` aborts the write and surfaces the error to the caller;
/// the stored document is left exactly as it was.
pub type MutateFn = Box<dyn FnOnce(&mut Session) -> Result<(), CarelinkError> + Send + 'static>;

/// Keyed persistence of session documents.
///
/// Expired sessions behave as not-found on every operation: `get` returns
/// `None` and `mutate` fails with [`CarelinkError::NotFound`]. The session
/// document is the only mutable shared resource of the workflow, so
/// [`SessionStore::mutate`] must execute read-check-write as a single
/// atomic step -- it is the serialization point that makes the at-most-once
/// collection guard hold under concurrent polling and double-submits.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a freshly created session.
    async fn create(&self, session: &Session) -> Result<(), CarelinkError>;

    /// Fetches a session by id. Expired or unknown ids read as `None`.
    async fn get(&self, session_id: &str) -> Result<Option<Session>, CarelinkError>;

    /// Atomically applies `f` to the stored document and persists the result.
    ///
    /// Returns the updated session. Fails with `NotFound` for unknown or
    /// expired ids, and with the closure's error (without writing) when `f`
    /// rejects the mutation.
    async fn mutate(&self, session_id: &str, f: MutateFn) -> Result<Session, CarelinkError>;

    /// Deletes a session. Deleting an unknown id is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), CarelinkError>;

    /// Removes all expired sessions, returning how many were reaped.
    async fn purge_expired(&self) -> Result<u64, CarelinkError>;

    /// Finds the live session linked to the given campaign order, if any.
    async fn find_by_campaign_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Session>, CarelinkError>;
}
