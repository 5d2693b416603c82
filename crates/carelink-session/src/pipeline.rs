// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background collection pipeline.
//!
//! Runs once per confirmed session: fetches the health dataset, then the
//! prescription dataset, then resolves the verified identity to a patient
//! record. The pipeline never retries a provider call inside one run --
//! retryable failures reset the collection guard and hand the decision back
//! to the user, so a rate-limited provider is never hammered in a loop.
//!
//! Every termination path lands in the session document as a state
//! transition plus a log message; the detached task itself never fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use carelink_core::types::{
    Dataset, DatasetKind, EventType, FetchOutcome, Session, SessionEvent, SessionStatus, Severity,
    VerifiedIdentity,
};
use carelink_core::{CarelinkError, IdentityProvider, ResolveIdentity, SessionStore};

use crate::notify::NotificationHub;

/// Orchestrates the two dataset fetches and the identity resolution.
pub struct CollectionPipeline {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    resolver: Arc<dyn ResolveIdentity>,
    hub: Arc<NotificationHub>,
    /// Wall-clock bound on a whole pipeline run.
    deadline: Duration,
}

impl CollectionPipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        resolver: Arc<dyn ResolveIdentity>,
        hub: Arc<NotificationHub>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            resolver,
            hub,
            deadline,
        }
    }

    /// Runs the pipeline for `session_id`.
    ///
    /// Infallible from the caller's point of view: all failures are
    /// recorded in the session document.
    pub async fn run(&self, session_id: &str) {
        match tokio::time::timeout(self.deadline, self.run_inner(session_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Usually the session expired or was deleted mid-run.
                warn!(session_id, error = %e, "collection pipeline aborted");
            }
            Err(_) => {
                error!(session_id, deadline = ?self.deadline, "collection pipeline hit its deadline");
                let _ = self
                    .settle(
                        session_id,
                        SessionStatus::Error,
                        true,
                        Severity::Error,
                        "collection timed out, please try again".to_string(),
                        EventType::Error,
                    )
                    .await;
            }
        }
    }

    async fn run_inner(&self, session_id: &str) -> Result<(), CarelinkError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CarelinkError::NotFound {
                session_id: session_id.to_string(),
            })?;
        let Some(identity) = session.verified_identity.clone() else {
            return self
                .settle(
                    session_id,
                    SessionStatus::Error,
                    true,
                    Severity::Error,
                    "no verified identity to collect for".to_string(),
                    EventType::Error,
                )
                .await;
        };

        let outcome = self.fetch(DatasetKind::Health, &identity).await;
        match outcome {
            FetchOutcome::Records(records) => {
                info!(session_id, records = records.len(), "health dataset fetched");
                self.store_dataset(session_id, DatasetKind::Health, records)
                    .await?;
            }
            other => return self.handle_failure(session_id, DatasetKind::Health, other).await,
        }

        let outcome = self.fetch(DatasetKind::Prescription, &identity).await;
        match outcome {
            FetchOutcome::Records(records) => {
                info!(
                    session_id,
                    records = records.len(),
                    "prescription dataset fetched"
                );
                self.store_dataset(session_id, DatasetKind::Prescription, records)
                    .await?;
            }
            other => {
                return self
                    .handle_failure(session_id, DatasetKind::Prescription, other)
                    .await;
            }
        }

        self.finish(session_id).await
    }

    /// One provider call; transport errors surface as transient outcomes.
    async fn fetch(&self, kind: DatasetKind, identity: &VerifiedIdentity) -> FetchOutcome {
        match self.provider.fetch_dataset(kind, identity).await {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::Transient {
                code: None,
                message: format!("provider unreachable: {e}"),
            },
        }
    }

    /// Persists a fetched dataset and advances the fetching state.
    async fn store_dataset(
        &self,
        session_id: &str,
        kind: DatasetKind,
        records: Vec<serde_json::Value>,
    ) -> Result<(), CarelinkError> {
        let session = self
            .store
            .mutate(
                session_id,
                Box::new(move |s| {
                    let dataset = Dataset {
                        kind,
                        provider_status: "OK".to_string(),
                        records,
                        fetched_at: Utc::now(),
                    };
                    match kind {
                        DatasetKind::Health => {
                            s.health_dataset = Some(dataset);
                            s.transition(SessionStatus::FetchingPrescriptionData)?;
                            s.push_message(Severity::Info, "health records fetched");
                        }
                        DatasetKind::Prescription => {
                            s.prescription_dataset = Some(dataset);
                            s.push_message(Severity::Info, "prescription records fetched");
                        }
                    }
                    Ok(())
                }),
            )
            .await?;
        self.hub.publish(
            session_id,
            SessionEvent::now(EventType::Status, session.status, None),
        );
        Ok(())
    }

    /// Applies the classified failure branch for one fetch.
    async fn handle_failure(
        &self,
        session_id: &str,
        kind: DatasetKind,
        outcome: FetchOutcome,
    ) -> Result<(), CarelinkError> {
        match outcome {
            FetchOutcome::Records(_) => unreachable!("success handled by the caller"),
            FetchOutcome::NotYetApproved => {
                info!(session_id, kind = %kind, "verification not yet approved, handing back");
                self.settle(
                    session_id,
                    SessionStatus::AuthCompleted,
                    true,
                    Severity::Warn,
                    "verification not approved yet, approve on your device and try again"
                        .to_string(),
                    EventType::Status,
                )
                .await
            }
            FetchOutcome::Transient { code, message } => {
                warn!(session_id, kind = %kind, code = ?code, %message, "transient provider failure");
                self.settle(
                    session_id,
                    SessionStatus::AuthCompleted,
                    true,
                    Severity::Warn,
                    "temporary provider problem, please try again".to_string(),
                    EventType::Status,
                )
                .await
            }
            FetchOutcome::UserInfoMismatch { message } => {
                warn!(session_id, kind = %kind, %message, "identity fields rejected by provider");
                self.settle(
                    session_id,
                    SessionStatus::InfoRequired,
                    false,
                    Severity::Error,
                    "please re-check your details".to_string(),
                    EventType::Error,
                )
                .await
            }
            FetchOutcome::Fatal { code, raw } => {
                error!(session_id, kind = %kind, code = ?code, raw = %raw, "fatal provider failure");
                let message = match code {
                    Some(code) => format!("data collection failed (provider code {code})"),
                    None => "data collection failed".to_string(),
                };
                self.store
                    .mutate(
                        session_id,
                        Box::new(move |s| {
                            s.transition(SessionStatus::Error)?;
                            s.guard.collection_started = false;
                            s.retry_available = false;
                            s.push_message(Severity::Error, &message);
                            // Raw payload kept in the log for support diagnosis.
                            s.push_message(Severity::Error, format!("provider payload: {raw}"));
                            Ok(())
                        }),
                    )
                    .await?;
                self.publish_current(session_id, EventType::Error).await;
                Ok(())
            }
        }
    }

    /// Terminal bookkeeping after both fetches were attempted.
    async fn finish(&self, session_id: &str) -> Result<(), CarelinkError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CarelinkError::NotFound {
                session_id: session_id.to_string(),
            })?;
        let has_data = session
            .health_dataset
            .as_ref()
            .is_some_and(Dataset::has_records)
            || session
                .prescription_dataset
                .as_ref()
                .is_some_and(Dataset::has_records);

        if !has_data {
            info!(session_id, "both fetches succeeded but returned no records");
            return self
                .settle(
                    session_id,
                    SessionStatus::Error,
                    false,
                    Severity::Error,
                    "no data collected".to_string(),
                    EventType::Error,
                )
                .await;
        }

        match self.resolver.resolve(&session).await {
            Ok(resolution) => {
                info!(
                    session_id,
                    patient_id = %resolution.patient_id,
                    hospital_id = %resolution.hospital_id,
                    created = resolution.created,
                    "identity resolved, collection complete"
                );
                let updated = self
                    .store
                    .mutate(
                        session_id,
                        Box::new(move |s| {
                            s.external_links.patient_id = Some(resolution.patient_id.clone());
                            s.external_links.hospital_id = Some(resolution.hospital_id.clone());
                            s.transition(SessionStatus::Completed)?;
                            s.guard.collection_completed = true;
                            s.retry_available = false;
                            s.push_message(Severity::Info, "collection completed");
                            Ok(())
                        }),
                    )
                    .await?;
                self.hub.publish(
                    session_id,
                    SessionEvent::now(
                        EventType::Completed,
                        updated.status,
                        Some("collection completed".to_string()),
                    ),
                );
                Ok(())
            }
            Err(e) => {
                error!(session_id, error = %e, "identity resolution failed");
                // Datasets stay on the session; only the patient link is missing.
                self.settle(
                    session_id,
                    SessionStatus::Error,
                    false,
                    Severity::Error,
                    format!("identity resolution failed: {e}"),
                    EventType::Error,
                )
                .await
            }
        }
    }

    /// Single mutate applying a terminal or hand-back transition.
    ///
    /// Every non-completed termination clears `collection_started` so a new
    /// client action can run the pipeline again.
    async fn settle(
        &self,
        session_id: &str,
        to: SessionStatus,
        retry_available: bool,
        severity: Severity,
        message: String,
        event_type: EventType,
    ) -> Result<(), CarelinkError> {
        let text = message.clone();
        let session = self
            .store
            .mutate(
                session_id,
                Box::new(move |s| {
                    s.transition(to)?;
                    s.guard.collection_started = false;
                    s.retry_available = retry_available;
                    s.push_message(severity, text);
                    Ok(())
                }),
            )
            .await?;
        self.hub.publish(
            session_id,
            SessionEvent::now(event_type, session.status, Some(message)),
        );
        Ok(())
    }

    async fn publish_current(&self, session_id: &str, event_type: EventType) {
        if let Ok(Some(session)) = self.store.get(session_id).await {
            self.hub.publish(
                session_id,
                SessionEvent::now(event_type, session.status, None),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{
        ExternalLinks, Gender, Resolution, SessionStatus, UserInfo, VerificationMethod,
    };
    use carelink_test_utils::{FixedResolver, MemorySessionStore, MockProvider};

    fn user_info() -> UserInfo {
        UserInfo {
            name: "Kim Jiwoo".into(),
            birthdate: "19900101".into(),
            phone: "01012345678".into(),
            gender: Some(Gender::Female),
            method: VerificationMethod::Kakao,
        }
    }

    struct Fixture {
        store: Arc<MemorySessionStore>,
        provider: Arc<MockProvider>,
        hub: Arc<NotificationHub>,
        pipeline: CollectionPipeline,
        session_id: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemorySessionStore::new());
        let provider = Arc::new(MockProvider::new());
        let hub = Arc::new(NotificationHub::new());
        let resolver = Arc::new(FixedResolver::new(Resolution {
            patient_id: "p-1".into(),
            hospital_id: "h-1".into(),
            created: true,
        }));

        let mut session = Session::new(
            user_info(),
            ExternalLinks::default(),
            chrono::Duration::minutes(30),
        );
        session.status = SessionStatus::FetchingHealthData;
        session.guard.collection_started = true;
        session.verified_identity = Some(VerifiedIdentity {
            correlation_id: "c-1".into(),
            name: "Kim Jiwoo".into(),
            birthdate: "19900101".into(),
            phone: "01012345678".into(),
        });
        let session_id = session.session_id.clone();
        store.create(&session).await.unwrap();

        let pipeline = CollectionPipeline::new(
            store.clone(),
            provider.clone(),
            resolver,
            hub.clone(),
            Duration::from_secs(30),
        );
        Fixture {
            store,
            provider,
            hub,
            pipeline,
            session_id,
        }
    }

    fn records(n: usize) -> FetchOutcome {
        FetchOutcome::Records(
            (0..n)
                .map(|i| serde_json::json!({"entry": i}))
                .collect(),
        )
    }

    #[tokio::test]
    async fn successful_run_completes_session() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(records(2)));
        f.provider.push_fetch(Ok(records(1)));
        let mut sub = f.hub.subscribe(&f.session_id);

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.guard.collection_completed);
        assert_eq!(session.external_links.patient_id.as_deref(), Some("p-1"));
        assert_eq!(session.external_links.hospital_id.as_deref(), Some("h-1"));

        // Last event on the channel is the completion.
        let mut last = None;
        while let Ok(event) = sub.events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().event_type, EventType::Completed);
    }

    #[tokio::test]
    async fn zero_records_on_both_is_no_data_error() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(records(0)));
        f.provider.push_fetch(Ok(records(0)));
        let mut sub = f.hub.subscribe(&f.session_id);

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(!session.guard.collection_started);
        assert!(!session.guard.collection_completed);
        assert!(
            session
                .messages
                .iter()
                .any(|m| m.text.contains("no data collected"))
        );
        let mut saw_completed = false;
        while let Ok(event) = sub.events.try_recv() {
            saw_completed |= event.event_type == EventType::Completed;
        }
        assert!(!saw_completed, "no completion event for empty collection");
    }

    #[tokio::test]
    async fn empty_health_with_prescription_data_still_completes() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(records(0)));
        f.provider.push_fetch(Ok(records(3)));

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(!session.health_dataset.unwrap().has_records());
        assert!(session.prescription_dataset.unwrap().has_records());
    }

    #[tokio::test]
    async fn not_yet_approved_hands_session_back_for_retry() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(FetchOutcome::NotYetApproved));

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AuthCompleted);
        assert!(!session.guard.collection_started);
        assert!(session.retry_available);
        // Second fetch was not attempted.
        assert_eq!(f.provider.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn mismatch_aborts_both_fetches_and_requires_reentry() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(FetchOutcome::UserInfoMismatch {
            message: "birthdate differs".into(),
        }));

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::InfoRequired);
        assert!(!session.guard.collection_started);
        assert!(!session.retry_available);
        assert_eq!(f.provider.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn fatal_error_preserves_raw_payload_in_log() {
        let f = fixture().await;
        f.provider.push_fetch(Ok(FetchOutcome::Fatal {
            code: Some("INTERNAL".into()),
            raw: r#"{"status":"Error","errorCode":"INTERNAL"}"#.into(),
        }));

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(!session.guard.collection_started);
        assert!(
            session
                .messages
                .iter()
                .any(|m| m.text.contains(r#""errorCode":"INTERNAL""#))
        );
    }

    #[tokio::test]
    async fn transport_error_is_treated_as_transient() {
        let f = fixture().await;
        f.provider.push_fetch(Err(CarelinkError::Provider {
            message: "connection refused".into(),
            source: None,
        }));

        f.pipeline.run(&f.session_id).await;

        let session = f.store.get(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AuthCompleted);
        assert!(session.retry_available);
    }
}
