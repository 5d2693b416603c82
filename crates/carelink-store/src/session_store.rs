// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`SessionStore`] trait.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use carelink_core::traits::session_store::MutateFn;
use carelink_core::types::Session;
use carelink_core::{CarelinkError, SessionStore};

use crate::database::Database;
use crate::queries;

/// SQLite-backed session store.
///
/// Wraps a [`Database`] handle and delegates to the typed query module.
/// TTL filtering happens on every read, and `mutate` executes its closure
/// on the single connection thread, which is what makes the collection
/// guard's read-check-write atomic.
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    /// Opens the database at `path`, running migrations.
    pub async fn open(path: &str) -> Result<Self, CarelinkError> {
        let db = Database::open(path).await?;
        debug!(path, "session store initialized");
        Ok(Self { db })
    }

    /// Builds a store over an already opened database.
    pub fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// The shared database handle (also used by the patient store adapter).
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &Session) -> Result<(), CarelinkError> {
        queries::sessions::insert(&self.db, session).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, CarelinkError> {
        queries::sessions::get(&self.db, session_id, Utc::now()).await
    }

    async fn mutate(&self, session_id: &str, f: MutateFn) -> Result<Session, CarelinkError> {
        queries::sessions::mutate(&self.db, session_id, f, Utc::now()).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), CarelinkError> {
        queries::sessions::delete(&self.db, session_id).await
    }

    async fn purge_expired(&self) -> Result<u64, CarelinkError> {
        queries::sessions::purge_expired(&self.db, Utc::now()).await
    }

    async fn find_by_campaign_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Session>, CarelinkError> {
        queries::sessions::find_by_campaign_order(&self.db, order_id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{
        ExternalLinks, Gender, SessionStatus, Severity, UserInfo, VerificationMethod,
    };
    use chrono::Duration;

    fn user_info() -> UserInfo {
        UserInfo {
            name: "Kim".into(),
            birthdate: "19900101".into(),
            phone: "01012345678".into(),
            gender: Some(Gender::Female),
            method: VerificationMethod::Kakao,
        }
    }

    async fn open_store() -> (tempfile::TempDir, SqliteSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let store = SqliteSessionStore::open(path.to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, store) = open_store().await;
        let session = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        store.create(&session).await.unwrap();

        let loaded = store.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.status, SessionStatus::Initiated);
        assert_eq!(loaded.user_info, session.user_info);
    }

    #[tokio::test]
    async fn expired_session_reads_as_none() {
        let (_dir, store) = open_store().await;
        let mut session = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        session.expires_at = Utc::now() - Duration::seconds(1);
        store.create(&session).await.unwrap();

        assert!(store.get(&session.session_id).await.unwrap().is_none());
        let err = store
            .mutate(&session.session_id, Box::new(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn mutate_persists_changes() {
        let (_dir, store) = open_store().await;
        let session = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        store.create(&session).await.unwrap();

        let updated = store
            .mutate(
                &session.session_id,
                Box::new(|s| {
                    s.push_message(Severity::Info, "hello");
                    s.guard.collection_started = true;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert!(updated.guard.collection_started);

        let loaded = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(loaded.guard.collection_started);
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn mutate_closure_error_aborts_write() {
        let (_dir, store) = open_store().await;
        let session = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        store.create(&session).await.unwrap();

        let err = store
            .mutate(
                &session.session_id,
                Box::new(|s| {
                    s.guard.collection_started = true;
                    Err(CarelinkError::Duplicate { status: s.status })
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::Duplicate { .. }));

        let loaded = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(
            !loaded.guard.collection_started,
            "aborted mutation must not be visible"
        );
    }

    #[tokio::test]
    async fn purge_expired_reaps_only_expired() {
        let (_dir, store) = open_store().await;
        let live = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        let mut dead = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        dead.expires_at = Utc::now() - Duration::seconds(1);
        store.create(&live).await.unwrap();
        store.create(&dead).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get(&live.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn campaign_order_lookup_finds_linked_session() {
        let (_dir, store) = open_store().await;
        let session = Session::new(
            user_info(),
            ExternalLinks {
                campaign_order_id: Some("order-7".into()),
                ..Default::default()
            },
            Duration::minutes(30),
        );
        store.create(&session).await.unwrap();

        let found = store
            .find_by_campaign_order("order-7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, session.session_id);
        assert!(store
            .find_by_campaign_order("order-8")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_mutates_serialize_on_the_guard() {
        let (_dir, store) = open_store().await;
        let store = std::sync::Arc::new(store);
        let session = Session::new(
            user_info(),
            ExternalLinks::default(),
            Duration::minutes(30),
        );
        store.create(&session).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = session.session_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .mutate(
                        &id,
                        Box::new(|s| {
                            if s.guard.collection_started {
                                return Err(CarelinkError::Duplicate { status: s.status });
                            }
                            s.guard.collection_started = true;
                            Ok(())
                        }),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one mutator may set the guard");
    }
}
