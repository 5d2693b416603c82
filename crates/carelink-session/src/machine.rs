// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session state machine.
//!
//! All client-facing session operations live here. Duplicate-sensitive
//! operations perform their check-and-set inside a single store `mutate`,
//! which is the serialization point for the at-most-once guarantees: the
//! closure rejects the mutation with [`CarelinkError::Duplicate`], the
//! machine catches it and answers with the current view tagged
//! `duplicate: true`, so client retry loops never see an error.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use carelink_core::types::{
    CollectionGuard, EventType, ExternalLinks, PendingVerification, SessionEvent, SessionStatus,
    SessionView, Severity, UserInfo, VerificationPoll, VerificationReply, VerificationRequest,
    VerifiedIdentity,
};
use carelink_core::{
    CarelinkError, IdentityProvider, PipelineSpawner, Session, SessionStore,
};

use crate::notify::NotificationHub;
use crate::pipeline::CollectionPipeline;

/// Timing and snapshot knobs, filled from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Session lifetime, refreshed on client activity.
    pub ttl: Duration,
    /// How long a sent verification request may wait for approval.
    pub verify_grace: Duration,
    /// Log entries replayed in a snapshot view.
    pub snapshot_messages: usize,
}

impl SessionSettings {
    pub fn new(ttl_secs: u64, verify_grace_secs: u64, snapshot_messages: usize) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            verify_grace: Duration::seconds(verify_grace_secs as i64),
            snapshot_messages,
        }
    }
}

/// Entry point for every session operation.
pub struct SessionStateMachine {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    hub: Arc<NotificationHub>,
    pipeline: Arc<CollectionPipeline>,
    spawner: Arc<dyn PipelineSpawner>,
    settings: SessionSettings,
}

impl SessionStateMachine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        hub: Arc<NotificationHub>,
        pipeline: Arc<CollectionPipeline>,
        spawner: Arc<dyn PipelineSpawner>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            provider,
            hub,
            pipeline,
            spawner,
            settings,
        }
    }

    /// Creates a session, or re-enters an existing one linked to the same
    /// campaign order so a paid order can retry without a second session.
    pub async fn start(
        &self,
        user_info: UserInfo,
        external_links: ExternalLinks,
    ) -> Result<SessionView, CarelinkError> {
        user_info.validate()?;

        if let Some(order_id) = external_links.campaign_order_id.clone()
            && let Some(existing) = self.store.find_by_campaign_order(&order_id).await?
        {
            if existing.status != SessionStatus::Initiated
                && !existing.status.can_transition(SessionStatus::Initiated)
            {
                // Verification in flight or already completed for this
                // order: hand back the live session instead of forking a
                // second one.
                debug!(
                    session_id = %existing.session_id,
                    status = %existing.status,
                    "campaign order already has a live session"
                );
                return Ok(self.view(&existing, true));
            }
            info!(
                session_id = %existing.session_id,
                campaign_order_id = %order_id,
                "re-entering session for campaign order"
            );
            let ttl = self.settings.ttl;
            let info = user_info.clone();
            let result = self
                .store
                .mutate(
                    &existing.session_id,
                    Box::new(move |s| {
                        // Re-checked under the mutate: the status may have
                        // moved since the lookup above.
                        if s.status != SessionStatus::Initiated
                            && !s.status.can_transition(SessionStatus::Initiated)
                        {
                            return Err(CarelinkError::Duplicate { status: s.status });
                        }
                        if s.status != SessionStatus::Initiated {
                            s.transition(SessionStatus::Initiated)?;
                        }
                        s.guard = CollectionGuard::default();
                        s.pending_verification = None;
                        s.retry_available = false;
                        s.user_info = info;
                        s.extend_to(Utc::now() + ttl);
                        s.push_message(Severity::Info, "session re-entered");
                        Ok(())
                    }),
                )
                .await;
            return match result {
                Ok(session) => Ok(self.view(&session, false)),
                Err(CarelinkError::Duplicate { status }) => {
                    debug!(
                        session_id = %existing.session_id,
                        status = %status,
                        "re-entry lost the race to an in-flight operation"
                    );
                    self.duplicate_view(&existing.session_id).await
                }
                Err(e) => Err(e),
            };
        }

        let session = Session::new(user_info, external_links, self.settings.ttl);
        self.store.create(&session).await?;
        info!(session_id = %session.session_id, "session created");
        Ok(self.view(&session, false))
    }

    /// Asks the provider to start an identity verification.
    ///
    /// The in-flight check and the move to `auth_requesting` happen in one
    /// atomic mutate, so a concurrent second call observes the new status
    /// and is suppressed before any provider traffic. The claim, the
    /// provider round-trip, and the follow-up transition run as one
    /// detached task: dropping this future (client disconnect) cannot
    /// commit the claim and strand the session in `auth_requesting`.
    pub async fn request_verification(
        &self,
        session_id: &str,
    ) -> Result<SessionView, CarelinkError> {
        let task = tokio::spawn(drive_verification(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            Arc::clone(&self.hub),
            self.settings.verify_grace,
            session_id.to_string(),
        ));
        let (session, duplicate) = task
            .await
            .map_err(|e| CarelinkError::Internal(format!("verification task failed: {e}")))??;
        Ok(self.view(&session, duplicate))
    }

    /// Confirms the pending verification and hands the session to the
    /// collection pipeline as a detached task. Returns immediately.
    ///
    /// The at-most-once claim and the pipeline hand-off run as one detached
    /// task for the same reason as [`Self::request_verification`]: a claim
    /// committed by a dropped request future must still spawn its pipeline.
    pub async fn confirm_and_collect(
        &self,
        session_id: &str,
    ) -> Result<SessionView, CarelinkError> {
        let task = tokio::spawn(drive_confirm(
            Arc::clone(&self.store),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.spawner),
            Arc::clone(&self.hub),
            session_id.to_string(),
        ));
        let (session, duplicate) = task
            .await
            .map_err(|e| CarelinkError::Internal(format!("confirm task failed: {e}")))??;
        Ok(self.view(&session, duplicate))
    }

    /// Read-mostly status poll.
    ///
    /// Counts as client activity (refreshes the TTL) and, while a sent
    /// verification is pending, polls the provider so the client does not
    /// strictly need a separate confirm step. A pending request older than
    /// the grace window moves the session to `timeout`.
    pub async fn status(&self, session_id: &str) -> Result<SessionView, CarelinkError> {
        let session = self.get_live(session_id).await?;

        let poll = match (&session.pending_verification, session.status) {
            (Some(pending), SessionStatus::AuthRequestSent) => {
                if Utc::now() - pending.requested_at > self.settings.verify_grace {
                    None // expired, handled below without a provider call
                } else {
                    match self.provider.check_verification(&pending.correlation_id).await {
                        Ok(poll) => Some(poll),
                        Err(e) => {
                            // Best-effort convenience; the explicit confirm
                            // path still works.
                            debug!(session_id, error = %e, "status-poll provider check failed");
                            Some(VerificationPoll::Pending)
                        }
                    }
                }
            }
            _ => Some(VerificationPoll::Pending),
        };

        let before = session.status;
        let ttl = self.settings.ttl;
        let grace = self.settings.verify_grace;
        let session = self
            .store
            .mutate(
                session_id,
                Box::new(move |s| {
                    let requested_at = if s.status == SessionStatus::AuthRequestSent {
                        s.pending_verification.as_ref().map(|p| p.requested_at)
                    } else {
                        None
                    };
                    if let Some(requested_at) = requested_at {
                        match &poll {
                            None if Utc::now() - requested_at > grace => {
                                s.pending_verification = None;
                                s.transition(SessionStatus::Timeout)?;
                                s.retry_available = true;
                                s.push_message(
                                    Severity::Warn,
                                    "verification was not approved in time",
                                );
                            }
                            Some(VerificationPoll::Completed) => {
                                s.transition(SessionStatus::AuthCompleted)?;
                                s.push_message(Severity::Info, "identity verified");
                            }
                            Some(VerificationPoll::Failed { code, .. }) => {
                                s.pending_verification = None;
                                s.transition(SessionStatus::Error)?;
                                s.retry_available = true;
                                let text = match code {
                                    Some(code) => {
                                        format!("verification failed (code {code})")
                                    }
                                    None => "verification failed".to_string(),
                                };
                                s.push_message(Severity::Error, text);
                            }
                            _ => {}
                        }
                    }
                    s.extend_to(Utc::now() + ttl);
                    Ok(())
                }),
            )
            .await?;

        if session.status != before {
            let event_type = match session.status {
                SessionStatus::Timeout | SessionStatus::Error => EventType::Error,
                _ => EventType::Status,
            };
            self.publish(session_id, event_type, &session);
        }
        Ok(self.view(&session, false))
    }

    /// Snapshot without the polling or TTL side effects, for the WS path.
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionView, CarelinkError> {
        let session = self.get_live(session_id).await?;
        Ok(self.view(&session, false))
    }

    /// Explicitly extends the session lifetime.
    pub async fn extend(
        &self,
        session_id: &str,
        seconds: u64,
    ) -> Result<SessionView, CarelinkError> {
        let extra = Duration::seconds(seconds as i64);
        let session = self
            .store
            .mutate(
                session_id,
                Box::new(move |s| {
                    s.extend_to(Utc::now() + extra);
                    Ok(())
                }),
            )
            .await?;
        Ok(self.view(&session, false))
    }

    /// Deletes the session. Unknown ids succeed silently.
    pub async fn cleanup(&self, session_id: &str) -> Result<(), CarelinkError> {
        self.hub.unsubscribe(session_id);
        self.store.delete(session_id).await
    }

    /// Reaps expired sessions, returning how many were removed.
    pub async fn cleanup_expired(&self) -> Result<u64, CarelinkError> {
        let reaped = self.store.purge_expired().await?;
        if reaped > 0 {
            info!(reaped, "expired sessions removed");
        }
        Ok(reaped)
    }

    /// Datasets of a completed session, for the downstream report pipeline.
    ///
    /// `Ok(None)` means the session exists but has not completed yet.
    pub async fn completed_datasets(
        &self,
        session_id: &str,
    ) -> Result<Option<carelink_core::types::CompletedDatasets>, CarelinkError> {
        let session = self.get_live(session_id).await?;
        if session.status != SessionStatus::Completed {
            return Ok(None);
        }
        Ok(Some(carelink_core::types::CompletedDatasets {
            health: session.health_dataset,
            prescription: session.prescription_dataset,
        }))
    }

    /// Marks report generation as started, at most once per session.
    pub async fn report_started(&self, session_id: &str) -> Result<SessionView, CarelinkError> {
        let result = self
            .store
            .mutate(
                session_id,
                Box::new(|s| {
                    if s.guard.report_generation_started {
                        return Err(CarelinkError::Duplicate { status: s.status });
                    }
                    if s.status != SessionStatus::Completed {
                        return Err(CarelinkError::Validation(
                            "session has not completed collection".into(),
                        ));
                    }
                    s.guard.report_generation_started = true;
                    s.push_message(Severity::Info, "report generation started");
                    Ok(())
                }),
            )
            .await;
        match result {
            Ok(session) => Ok(self.view(&session, false)),
            Err(CarelinkError::Duplicate { status }) => {
                debug!(session_id, status = %status, "report generation already started");
                self.duplicate_view(session_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn get_live(&self, session_id: &str) -> Result<Session, CarelinkError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| CarelinkError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn duplicate_view(&self, session_id: &str) -> Result<SessionView, CarelinkError> {
        let session = self.get_live(session_id).await?;
        Ok(self.view(&session, true))
    }

    fn view(&self, session: &Session, duplicate: bool) -> SessionView {
        session.view(self.settings.snapshot_messages, duplicate)
    }

    fn publish(&self, session_id: &str, event_type: EventType, session: &Session) {
        let message = session.messages.last().map(|m| m.text.clone());
        self.hub.publish(
            session_id,
            SessionEvent::now(event_type, session.status, message),
        );
    }

    /// Hub handle for the gateway's WebSocket surface.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }
}

/// Claims the verification sub-flow and performs the provider round-trip.
///
/// Spawned as a detached task so that once the `auth_requesting` claim is
/// committed, the provider call and the follow-up transition always run,
/// whatever happens to the requesting connection.
async fn drive_verification(
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn IdentityProvider>,
    hub: Arc<NotificationHub>,
    grace: Duration,
    session_id: String,
) -> Result<(Session, bool), CarelinkError> {
    let claimed = store
        .mutate(
            &session_id,
            Box::new(|s| {
                if s.status.verification_in_flight() || s.pending_verification.is_some() {
                    return Err(CarelinkError::Duplicate { status: s.status });
                }
                s.transition(SessionStatus::AuthRequesting)?;
                s.push_message(Severity::Info, "requesting identity verification");
                Ok(())
            }),
        )
        .await;
    let claimed = match claimed {
        Ok(session) => session,
        Err(CarelinkError::Duplicate { status }) => {
            debug!(session_id = %session_id, status = %status, "verification request suppressed");
            return Ok((live(&store, &session_id).await?, true));
        }
        Err(e) => return Err(e),
    };

    let request = VerificationRequest::from_user_info(&claimed.user_info);
    let reply = provider.request_verification(&request).await;

    let (session, event_type) = match reply {
        Ok(VerificationReply::Accepted { correlation_id }) => {
            info!(session_id = %session_id, correlation_id = %correlation_id, "verification request accepted");
            let session = store
                .mutate(
                    &session_id,
                    Box::new(move |s| {
                        s.pending_verification = Some(PendingVerification {
                            correlation_id,
                            requested_at: Utc::now(),
                        });
                        s.transition(SessionStatus::AuthRequestSent)?;
                        s.extend_to(s.expires_at + grace);
                        s.push_message(
                            Severity::Info,
                            "verification request sent, approve on your device",
                        );
                        Ok(())
                    }),
                )
                .await?;
            (session, EventType::Status)
        }
        Ok(VerificationReply::ChannelUnreachable) => {
            warn!(session_id = %session_id, "verification channel unreachable for this user");
            let session = store
                .mutate(
                    &session_id,
                    Box::new(|s| {
                        s.transition(SessionStatus::Error)?;
                        s.retry_available = false;
                        s.push_message(
                            Severity::Error,
                            "verification is not available for this user",
                        );
                        Ok(())
                    }),
                )
                .await?;
            (session, EventType::Error)
        }
        Ok(VerificationReply::Rejected { code, message }) => {
            warn!(session_id = %session_id, code = ?code, message = ?message, "verification request rejected");
            let text = match code {
                Some(code) => format!("verification request rejected (code {code})"),
                None => "verification request rejected".to_string(),
            };
            let session = store
                .mutate(
                    &session_id,
                    Box::new(move |s| {
                        s.transition(SessionStatus::Error)?;
                        s.retry_available = true;
                        s.push_message(Severity::Error, text);
                        Ok(())
                    }),
                )
                .await?;
            (session, EventType::Error)
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "verification request failed");
            let text = format!("verification request failed: {e}");
            let session = store
                .mutate(
                    &session_id,
                    Box::new(move |s| {
                        s.transition(SessionStatus::Error)?;
                        s.retry_available = true;
                        s.push_message(Severity::Error, text);
                        Ok(())
                    }),
                )
                .await?;
            (session, EventType::Error)
        }
    };
    publish_last(&hub, &session_id, event_type, &session);
    Ok((session, false))
}

/// Claims the at-most-once collection guard and hands off to the pipeline.
///
/// Spawned detached for the same reason as [`drive_verification`]: a
/// committed `collection_started` claim must always reach the spawner.
async fn drive_confirm(
    store: Arc<dyn SessionStore>,
    pipeline: Arc<CollectionPipeline>,
    spawner: Arc<dyn PipelineSpawner>,
    hub: Arc<NotificationHub>,
    session_id: String,
) -> Result<(Session, bool), CarelinkError> {
    let result = store
        .mutate(
            &session_id,
            Box::new(|s| {
                if (s.guard.collection_started && !s.guard.collection_completed)
                    || s.status.collection_in_flight_or_done()
                {
                    return Err(CarelinkError::Duplicate { status: s.status });
                }
                if let Some(pending) = s.pending_verification.take() {
                    s.verified_identity = Some(VerifiedIdentity {
                        correlation_id: pending.correlation_id,
                        name: s.user_info.name.clone(),
                        birthdate: s.user_info.birthdate.clone(),
                        phone: s.user_info.phone.clone(),
                    });
                } else if s.verified_identity.is_none() {
                    return Err(CarelinkError::Validation(
                        "no verification to confirm".into(),
                    ));
                }
                s.guard.collection_started = true;
                s.retry_available = false;
                s.transition(SessionStatus::FetchingHealthData)?;
                s.push_message(Severity::Info, "collecting health records");
                Ok(())
            }),
        )
        .await;
    let session = match result {
        Ok(session) => session,
        Err(CarelinkError::Duplicate { status }) => {
            debug!(session_id = %session_id, status = %status, "collection already in flight");
            return Ok((live(&store, &session_id).await?, true));
        }
        Err(e) => return Err(e),
    };

    let id = session_id.clone();
    spawner.submit(Box::pin(async move { pipeline.run(&id).await }));

    publish_last(&hub, &session_id, EventType::Status, &session);
    Ok((session, false))
}

async fn live(
    store: &Arc<dyn SessionStore>,
    session_id: &str,
) -> Result<Session, CarelinkError> {
    store
        .get(session_id)
        .await?
        .ok_or_else(|| CarelinkError::NotFound {
            session_id: session_id.to_string(),
        })
}

fn publish_last(
    hub: &NotificationHub,
    session_id: &str,
    event_type: EventType,
    session: &Session,
) {
    let message = session.messages.last().map(|m| m.text.clone());
    hub.publish(
        session_id,
        SessionEvent::now(event_type, session.status, message),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{Gender, Resolution, VerificationMethod};
    use carelink_test_utils::{FixedResolver, MemorySessionStore, MockProvider, QueueSpawner};

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
        spawner: Arc<QueueSpawner>,
        machine: SessionStateMachine,
    }

    fn machine_with(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        spawner: Arc<QueueSpawner>,
    ) -> SessionStateMachine {
        let hub = Arc::new(NotificationHub::new());
        let resolver = Arc::new(FixedResolver::new(Resolution {
            patient_id: "p-1".into(),
            hospital_id: "h-1".into(),
            created: false,
        }));
        let pipeline = Arc::new(CollectionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            resolver,
            Arc::clone(&hub),
            std::time::Duration::from_secs(30),
        ));
        SessionStateMachine::new(
            store,
            provider,
            hub,
            pipeline,
            spawner,
            SessionSettings::new(1800, 300, 20),
        )
    }

    fn fixture() -> Fixture {
        let store: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());
        let provider = Arc::new(MockProvider::new());
        let spawner = Arc::new(QueueSpawner::new());
        let machine = machine_with(store.clone(), provider.clone(), spawner.clone());
        Fixture {
            store,
            provider,
            spawner,
            machine,
        }
    }

    fn accepted(id: &str) -> Result<VerificationReply, CarelinkError> {
        Ok(VerificationReply::Accepted {
            correlation_id: id.into(),
        })
    }

    #[tokio::test]
    async fn start_rejects_incomplete_user_info() {
        let f = fixture();
        let mut info = user_info();
        info.name = "  ".into();
        let err = f
            .machine
            .start(info, ExternalLinks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::Validation(_)));
    }

    #[tokio::test]
    async fn verify_twice_calls_provider_once_and_tags_duplicate() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        let first = f.machine.request_verification(&view.session_id).await.unwrap();
        assert_eq!(first.status, SessionStatus::AuthRequestSent);
        assert!(!first.duplicate);

        let second = f.machine.request_verification(&view.session_id).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(second.status, SessionStatus::AuthRequestSent);
        assert_eq!(f.provider.verification_calls(), 1);
    }

    #[tokio::test]
    async fn rejected_verification_offers_retry() {
        let f = fixture();
        f.provider.push_verification(Ok(VerificationReply::Rejected {
            code: Some("BAD_PHONE".into()),
            message: None,
        }));
        f.provider.push_verification(accepted("c-2"));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        let failed = f.machine.request_verification(&view.session_id).await.unwrap();
        assert_eq!(failed.status, SessionStatus::Error);
        assert!(failed.retry_available);

        // Error state with no pending verification: a second request is
        // allowed, not a duplicate.
        let retried = f.machine.request_verification(&view.session_id).await.unwrap();
        assert!(!retried.duplicate);
        assert_eq!(retried.status, SessionStatus::AuthRequestSent);
    }

    #[tokio::test]
    async fn channel_unreachable_is_terminal_without_retry() {
        let f = fixture();
        f.provider
            .push_verification(Ok(VerificationReply::ChannelUnreachable));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        let result = f.machine.request_verification(&view.session_id).await.unwrap();
        assert_eq!(result.status, SessionStatus::Error);
        assert!(!result.retry_available);
    }

    #[tokio::test]
    async fn confirm_runs_pipeline_once_despite_double_submit() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![
                serde_json::json!({"entry": 1}),
            ])));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![])));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();

        let first = f.machine.confirm_and_collect(&view.session_id).await.unwrap();
        assert_eq!(first.status, SessionStatus::FetchingHealthData);
        assert!(!first.duplicate);

        let second = f.machine.confirm_and_collect(&view.session_id).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(f.spawner.submitted(), 1);

        f.spawner.drain().await;
        let session = f.store.get(&view.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(f.provider.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn confirm_without_verification_is_a_validation_error() {
        let f = fixture();
        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        let err = f
            .machine
            .confirm_and_collect(&view.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::Validation(_)));
    }

    #[tokio::test]
    async fn reconfirm_after_not_yet_approved_reuses_verified_identity() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::NotYetApproved));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![
                serde_json::json!({"entry": 1}),
            ])));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![])));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();

        f.machine.confirm_and_collect(&view.session_id).await.unwrap();
        f.spawner.drain().await;
        let session = f.store.get(&view.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AuthCompleted);
        assert!(!session.guard.collection_started);

        // Pending was consumed by the first confirm; the retry rides on the
        // kept verified identity.
        let retried = f.machine.confirm_and_collect(&view.session_id).await.unwrap();
        assert!(!retried.duplicate);
        f.spawner.drain().await;
        let session = f.store.get(&view.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn status_self_heals_to_auth_completed() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));
        f.provider.push_poll(Ok(VerificationPoll::Completed));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();

        let polled = f.machine.status(&view.session_id).await.unwrap();
        assert_eq!(polled.status, SessionStatus::AuthCompleted);

        // Approval observed, polling stops: no further provider calls.
        let again = f.machine.status(&view.session_id).await.unwrap();
        assert_eq!(again.status, SessionStatus::AuthCompleted);
        assert_eq!(f.provider.poll_calls(), 1);
    }

    #[tokio::test]
    async fn status_is_idempotent_while_pending() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));
        f.provider.push_poll(Ok(VerificationPoll::Pending));
        f.provider.push_poll(Ok(VerificationPoll::Pending));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();

        let first = f.machine.status(&view.session_id).await.unwrap();
        let second = f.machine.status(&view.session_id).await.unwrap();
        assert_eq!(first.status, SessionStatus::AuthRequestSent);
        assert_eq!(second.status, SessionStatus::AuthRequestSent);
    }

    #[tokio::test]
    async fn status_refreshes_ttl() {
        let f = fixture();
        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        let before = view.expires_at;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let after = f.machine.status(&view.session_id).await.unwrap();
        assert!(after.expires_at > before);
    }

    #[tokio::test]
    async fn stale_pending_verification_times_out() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();

        // Backdate the pending request past the grace window.
        f.store
            .mutate(
                &view.session_id,
                Box::new(|s| {
                    if let Some(pending) = &mut s.pending_verification {
                        pending.requested_at = Utc::now() - Duration::seconds(301);
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let polled = f.machine.status(&view.session_id).await.unwrap();
        assert_eq!(polled.status, SessionStatus::Timeout);
        assert!(polled.retry_available);
        // No provider poll for an already-stale request.
        assert_eq!(f.provider.poll_calls(), 0);

        // Timeout is terminal only until a new client action.
        f.provider.push_verification(accepted("c-2"));
        let retried = f.machine.request_verification(&view.session_id).await.unwrap();
        assert_eq!(retried.status, SessionStatus::AuthRequestSent);
    }

    #[tokio::test]
    async fn campaign_order_reentry_reuses_the_session() {
        let f = fixture();
        let links = ExternalLinks {
            campaign_order_id: Some("order-7".into()),
            ..ExternalLinks::default()
        };
        let first = f
            .machine
            .start(user_info(), links.clone())
            .await
            .unwrap();

        // Drive the session into a terminal error.
        f.provider
            .push_verification(Ok(VerificationReply::ChannelUnreachable));
        f.machine.request_verification(&first.session_id).await.unwrap();

        let second = f.machine.start(user_info(), links).await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.status, SessionStatus::Initiated);
    }

    #[tokio::test]
    async fn expired_session_reads_as_not_found() {
        let f = fixture();
        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.store
            .mutate(
                &view.session_id,
                Box::new(|s| {
                    s.expires_at = Utc::now() - Duration::seconds(1);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let err = f.machine.status(&view.session_id).await.unwrap_err();
        assert!(matches!(err, CarelinkError::NotFound { .. }));
        let err = f
            .machine
            .confirm_and_collect(&view.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn report_started_guard_suppresses_second_call() {
        let f = fixture();
        f.provider.push_verification(accepted("c-1"));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![
                serde_json::json!({"entry": 1}),
            ])));
        f.provider
            .push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![])));

        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        f.machine.request_verification(&view.session_id).await.unwrap();
        f.machine.confirm_and_collect(&view.session_id).await.unwrap();
        f.spawner.drain().await;

        let first = f.machine.report_started(&view.session_id).await.unwrap();
        assert!(!first.duplicate);
        let second = f.machine.report_started(&view.session_id).await.unwrap();
        assert!(second.duplicate);
    }

    /// Provider whose verification request resolves only after a delay.
    struct SlowProvider {
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl IdentityProvider for SlowProvider {
        async fn request_verification(
            &self,
            _request: &VerificationRequest,
        ) -> Result<VerificationReply, CarelinkError> {
            tokio::time::sleep(self.delay).await;
            Ok(VerificationReply::Accepted {
                correlation_id: "c-slow".into(),
            })
        }

        async fn check_verification(
            &self,
            _correlation_id: &str,
        ) -> Result<VerificationPoll, CarelinkError> {
            Ok(VerificationPoll::Pending)
        }

        async fn fetch_dataset(
            &self,
            _kind: carelink_core::types::DatasetKind,
            _identity: &VerifiedIdentity,
        ) -> Result<carelink_core::types::FetchOutcome, CarelinkError> {
            Ok(carelink_core::types::FetchOutcome::Records(vec![]))
        }
    }

    /// Store whose mutate commits first, then lags before the caller sees
    /// the result, like a connection-thread reply racing a disconnect.
    struct LaggyStore {
        inner: MemorySessionStore,
        lag: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl SessionStore for LaggyStore {
        async fn create(&self, session: &Session) -> Result<(), CarelinkError> {
            self.inner.create(session).await
        }

        async fn get(&self, session_id: &str) -> Result<Option<Session>, CarelinkError> {
            self.inner.get(session_id).await
        }

        async fn mutate(
            &self,
            session_id: &str,
            f: carelink_core::traits::session_store::MutateFn,
        ) -> Result<Session, CarelinkError> {
            let session = self.inner.mutate(session_id, f).await;
            tokio::time::sleep(self.lag).await;
            session
        }

        async fn delete(&self, session_id: &str) -> Result<(), CarelinkError> {
            self.inner.delete(session_id).await
        }

        async fn purge_expired(&self) -> Result<u64, CarelinkError> {
            self.inner.purge_expired().await
        }

        async fn find_by_campaign_order(
            &self,
            order_id: &str,
        ) -> Result<Option<Session>, CarelinkError> {
            self.inner.find_by_campaign_order(order_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_request_future_still_reaches_auth_request_sent() {
        let store: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());
        let provider = Arc::new(SlowProvider {
            delay: std::time::Duration::from_millis(100),
        });
        let spawner = Arc::new(QueueSpawner::new());
        let machine = machine_with(store.clone(), provider, spawner);

        let view = machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();

        // Client disconnects mid provider call: the request future is dropped.
        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            machine.request_verification(&view.session_id),
        )
        .await;
        assert!(dropped.is_err());

        // The detached claim task finishes the round-trip on its own.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let session = store.get(&view.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AuthRequestSent);
        assert!(session.pending_verification.is_some());

        // And the session is not wedged: a retry is suppressed as a
        // duplicate of forward-progressing work, not of a dead claim.
        let retried = machine.request_verification(&view.session_id).await.unwrap();
        assert!(retried.duplicate);
        assert_eq!(retried.status, SessionStatus::AuthRequestSent);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_confirm_future_still_spawns_the_pipeline() {
        let store = Arc::new(LaggyStore {
            inner: MemorySessionStore::new(),
            lag: std::time::Duration::from_millis(100),
        });
        let provider = Arc::new(MockProvider::new());
        provider.push_verification(accepted("c-1"));
        provider.push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![
            serde_json::json!({"entry": 1}),
        ])));
        provider.push_fetch(Ok(carelink_core::types::FetchOutcome::Records(vec![])));
        let spawner = Arc::new(QueueSpawner::new());
        let machine = machine_with(store.clone(), provider, spawner.clone());

        let view = machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        machine.request_verification(&view.session_id).await.unwrap();

        // Dropped between the guard claim committing and the hand-off.
        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            machine.confirm_and_collect(&view.session_id),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(
            spawner.submitted(),
            1,
            "committed claim must still reach the spawner"
        );
        spawner.drain().await;
        let session = store.get(&view.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn start_with_order_in_auth_flight_returns_duplicate_view() {
        let f = fixture();
        let links = ExternalLinks {
            campaign_order_id: Some("order-9".into()),
            ..ExternalLinks::default()
        };
        let first = f.machine.start(user_info(), links.clone()).await.unwrap();
        f.provider.push_verification(accepted("c-1"));
        f.machine.request_verification(&first.session_id).await.unwrap();

        // Auth in flight for this order: re-entry answers with the live
        // view, never an error and never a second session.
        let second = f.machine.start(user_info(), links).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.status, SessionStatus::AuthRequestSent);
    }

    #[tokio::test]
    async fn datasets_unavailable_until_completed() {
        let f = fixture();
        let view = f
            .machine
            .start(user_info(), ExternalLinks::default())
            .await
            .unwrap();
        assert!(
            f.machine
                .completed_datasets(&view.session_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
