// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory session store for machine and pipeline unit tests.
//!
//! Mirrors the sqlite store's contract: expired sessions read as
//! not-found, and `mutate` applies its closure under the map lock so the
//! read-check-write step is atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use carelink_core::traits::MutateFn;
use carelink_core::{CarelinkError, Session, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), CarelinkError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, CarelinkError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned())
    }

    async fn mutate(&self, session_id: &str, f: MutateFn) -> Result<Session, CarelinkError> {
        let mut sessions = self.sessions.lock().unwrap();
        let stored = sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now()))
            .ok_or_else(|| CarelinkError::NotFound {
                session_id: session_id.to_string(),
            })?;
        let mut candidate = stored.clone();
        f(&mut candidate)?;
        candidate.updated_at = Utc::now();
        sessions.insert(session_id.to_string(), candidate.clone());
        Ok(candidate)
    }

    async fn delete(&self, session_id: &str) -> Result<(), CarelinkError> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CarelinkError> {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn find_by_campaign_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Session>, CarelinkError> {
        let sessions = self.sessions.lock().unwrap();
        let now = Utc::now();
        Ok(sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .find(|s| s.external_links.campaign_order_id.as_deref() == Some(order_id))
            .cloned())
    }
}
