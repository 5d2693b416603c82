// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the Carelink workspace.
//!
//! The [`Session`] document is the aggregate root of the
//! verification-and-collection workflow. It is owned exclusively by the
//! session state machine and the collection pipeline; every mutation goes
//! through the session store's atomic read-modify-write primitive.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CarelinkError;

/// States of the session workflow.
///
/// The variant set is closed and transitions are validated against
/// [`SessionStatus::can_transition`]; any transition not in the table is
/// rejected without mutating the session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created, nothing requested yet.
    Initiated,
    /// A verification request is being sent to the provider.
    AuthRequesting,
    /// Provider accepted the request; waiting for out-of-band user approval.
    AuthRequestSent,
    /// User approved on their device; collection may start.
    AuthCompleted,
    /// Provider rejected the supplied identity fields; full re-entry required.
    InfoRequired,
    /// Background pipeline is fetching the health dataset.
    FetchingHealthData,
    /// Background pipeline is fetching the prescription dataset.
    FetchingPrescriptionData,
    /// Both fetches done and at least one dataset has records.
    Completed,
    /// Terminal for the current attempt. A new client action may re-enter.
    Error,
    /// Pending verification outlived its grace window without approval.
    Timeout,
}

impl SessionStatus {
    /// Returns true when `self -> to` appears in the transition table.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Initiated, AuthRequesting)
                | (AuthRequesting, AuthRequestSent)
                | (AuthRequesting, Error)
                | (AuthRequestSent, AuthCompleted)
                | (AuthRequestSent, FetchingHealthData)
                | (AuthRequestSent, Error)
                | (AuthRequestSent, Timeout)
                | (AuthCompleted, FetchingHealthData)
                | (AuthCompleted, Error)
                | (AuthCompleted, Timeout)
                | (FetchingHealthData, FetchingPrescriptionData)
                | (FetchingHealthData, AuthCompleted)
                | (FetchingHealthData, InfoRequired)
                | (FetchingHealthData, Error)
                | (FetchingPrescriptionData, Completed)
                | (FetchingPrescriptionData, AuthCompleted)
                | (FetchingPrescriptionData, InfoRequired)
                | (FetchingPrescriptionData, Error)
                | (Error, AuthRequesting)
                | (Error, Initiated)
                | (InfoRequired, AuthRequesting)
                | (InfoRequired, Initiated)
                | (Timeout, AuthRequesting)
                | (Timeout, Initiated)
                | (FetchingHealthData, Initiated)
                | (FetchingPrescriptionData, Initiated)
        )
    }

    /// True for states indicating a verification request already in flight.
    pub fn verification_in_flight(self) -> bool {
        matches!(
            self,
            SessionStatus::AuthRequesting
                | SessionStatus::AuthRequestSent
                | SessionStatus::AuthCompleted
        )
    }

    /// True for states indicating the collection pipeline is running or done.
    pub fn collection_in_flight_or_done(self) -> bool {
        matches!(
            self,
            SessionStatus::FetchingHealthData
                | SessionStatus::FetchingPrescriptionData
                | SessionStatus::Completed
        )
    }
}

/// Verification channels accepted by the identity-verification provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Kakao,
    Naver,
    Pass,
    Toss,
    Payco,
}

/// Patient gender as supplied by the client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// The two datasets fetched by the collection pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Health,
    Prescription,
}

/// Severity of a session log message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// User-supplied identity fields, immutable once set except through explicit re-entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// Birthdate in `YYYYMMDD` form.
    pub birthdate: String,
    pub phone: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub method: VerificationMethod,
}

impl UserInfo {
    /// Validates completeness of the fields the provider requires.
    pub fn validate(&self) -> Result<(), CarelinkError> {
        if self.name.trim().is_empty() {
            return Err(CarelinkError::Validation("name must not be empty".into()));
        }
        if self.birthdate.trim().is_empty() {
            return Err(CarelinkError::Validation(
                "birthdate must not be empty".into(),
            ));
        }
        if self.phone.trim().is_empty() {
            return Err(CarelinkError::Validation("phone must not be empty".into()));
        }
        Ok(())
    }
}

/// Links set when the session is entered from an upstream flow (paid campaign etc.).
///
/// Used by the identity resolver as resolution hints; all fields optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLinks {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub hospital_id: Option<String>,
    #[serde(default)]
    pub campaign_order_id: Option<String>,
    #[serde(default)]
    pub entry_path: Option<String>,
}

/// Provider correlation data for a verification request that has not been
/// confirmed yet. Cleared when confirmation promotes it into [`VerifiedIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVerification {
    pub correlation_id: String,
    pub requested_at: DateTime<Utc>,
}

/// Provider-verified identity, authoritative once present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub correlation_id: String,
    pub name: String,
    pub birthdate: String,
    pub phone: String,
}

/// At-most-once guards for downstream operations.
///
/// Each flag is checked and set inside a single atomic read-modify-write
/// against the session store, which makes it the serialization point for
/// the invocation it protects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionGuard {
    /// Set when `confirm_and_collect` hands the session to the pipeline.
    /// While true (and not completed), no code path may start it again.
    pub collection_started: bool,
    /// Set by the pipeline after a successful run.
    pub collection_completed: bool,
    /// Set by the downstream report pipeline so it, too, only triggers once.
    pub report_generation_started: bool,
}

/// A fetched dataset plus the provider status it came back with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub kind: DatasetKind,
    pub provider_status: String,
    pub records: Vec<serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

impl Dataset {
    /// True when the fetch succeeded with at least one record.
    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }
}

/// One entry of the append-only human-readable status log.
///
/// Insertion order is meaningful: clients replay the log in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
}

/// The session aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    pub user_info: UserInfo,
    #[serde(default)]
    pub external_links: ExternalLinks,
    #[serde(default)]
    pub pending_verification: Option<PendingVerification>,
    #[serde(default)]
    pub verified_identity: Option<VerifiedIdentity>,
    #[serde(default)]
    pub guard: CollectionGuard,
    #[serde(default)]
    pub health_dataset: Option<Dataset>,
    #[serde(default)]
    pub prescription_dataset: Option<Dataset>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    /// Whether the client should offer a retry action for the current state.
    #[serde(default)]
    pub retry_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session in [`SessionStatus::Initiated`].
    pub fn new(user_info: UserInfo, external_links: ExternalLinks, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Initiated,
            user_info,
            external_links,
            pending_verification: None,
            verified_identity: None,
            guard: CollectionGuard::default(),
            health_dataset: None,
            prescription_dataset: None,
            messages: Vec::new(),
            retry_available: false,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// True once `expires_at` has passed. Expired sessions read as not-found.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Applies a validated state transition.
    ///
    /// Transitions outside the table are rejected with an internal error and
    /// leave the session untouched.
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), CarelinkError> {
        if !self.status.can_transition(to) {
            return Err(CarelinkError::Internal(format!(
                "illegal session transition {} -> {} (session {})",
                self.status, to, self.session_id
            )));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Appends a status log entry.
    pub fn push_message(&mut self, severity: Severity, text: impl Into<String>) {
        self.messages.push(SessionMessage {
            at: Utc::now(),
            severity,
            text: text.into(),
        });
    }

    /// Extends `expires_at` to `deadline` if that is later than the current
    /// value. Expiry is monotonically non-decreasing across extensions.
    pub fn extend_to(&mut self, deadline: DateTime<Utc>) {
        if deadline > self.expires_at {
            self.expires_at = deadline;
            self.updated_at = Utc::now();
        }
    }

    /// Builds a client-facing snapshot with the latest `message_limit` log
    /// entries. Datasets are attached only once the session is completed.
    pub fn view(&self, message_limit: usize, duplicate: bool) -> SessionView {
        let skip = self.messages.len().saturating_sub(message_limit);
        let datasets = if self.status == SessionStatus::Completed {
            Some(CompletedDatasets {
                health: self.health_dataset.clone(),
                prescription: self.prescription_dataset.clone(),
            })
        } else {
            None
        };
        SessionView {
            session_id: self.session_id.clone(),
            status: self.status,
            duplicate,
            retry_available: self.retry_available,
            has_health_data: self
                .health_dataset
                .as_ref()
                .is_some_and(Dataset::has_records),
            has_prescription_data: self
                .prescription_dataset
                .as_ref()
                .is_some_and(Dataset::has_records),
            messages: self.messages[skip..].to_vec(),
            datasets,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Datasets attached to a completed session view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedDatasets {
    pub health: Option<Dataset>,
    pub prescription: Option<Dataset>,
}

/// Read-only client snapshot of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    /// True when the triggering operation was suppressed as already in flight.
    pub duplicate: bool,
    pub retry_available: bool,
    pub has_health_data: bool,
    pub has_prescription_data: bool,
    pub messages: Vec<SessionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasets: Option<CompletedDatasets>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// --- Provider interface types ---

/// Input for a provider verification request.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRequest {
    pub method: VerificationMethod,
    pub name: String,
    pub birthdate: String,
    pub phone: String,
}

impl VerificationRequest {
    pub fn from_user_info(info: &UserInfo) -> Self {
        Self {
            method: info.method,
            name: info.name.clone(),
            birthdate: info.birthdate.clone(),
            phone: info.phone.clone(),
        }
    }
}

/// Provider reply to a verification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationReply {
    /// Request accepted; the user must now approve on their device.
    Accepted { correlation_id: String },
    /// Provider answered OK but without a correlation id: the verification
    /// channel is unreachable for this user. Terminal, no retry offered.
    ChannelUnreachable,
    /// Provider rejected the request. Retry offered.
    Rejected {
        code: Option<String>,
        message: Option<String>,
    },
}

/// Provider reply to a verification status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationPoll {
    /// User approved; collection may be confirmed.
    Completed,
    /// Still waiting for out-of-band approval.
    Pending,
    /// Verification failed on the provider side.
    Failed {
        code: Option<String>,
        message: Option<String>,
    },
}

/// Classified outcome of a dataset fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fetch succeeded. An empty vector is success with zero records.
    Records(Vec<serde_json::Value>),
    /// The user has not approved the verification yet (HTML body or explicit
    /// code). Retryable: the guard resets and the client re-triggers.
    NotYetApproved,
    /// Transient provider failure. Retryable the same way.
    Transient {
        code: Option<String>,
        message: String,
    },
    /// Supplied identity fields do not match the provider's records. Fatal
    /// for the attempt; the second fetch is not attempted.
    UserInfoMismatch { message: String },
    /// Unrecoverable provider failure. The raw payload is preserved for
    /// support diagnosis.
    Fatal {
        code: Option<String>,
        raw: String,
    },
}

// --- Patient store types ---

/// Patient record in the externally-owned relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub uuid: String,
    pub hospital_id: String,
    pub name: String,
    pub phone: String,
    pub birth_date: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub has_health_data: bool,
    #[serde(default)]
    pub has_prescription_data: bool,
}

/// (phone, birthdate, name) tuple deduplicating patient identities across entry points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub name: String,
    pub birthdate: String,
    pub phone: String,
}

impl NaturalKey {
    pub fn from_user_info(info: &UserInfo) -> Self {
        Self {
            name: info.name.clone(),
            birthdate: info.birthdate.clone(),
            phone: info.phone.clone(),
        }
    }

    pub fn from_verified(identity: &VerifiedIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            birthdate: identity.birthdate.clone(),
            phone: identity.phone.clone(),
        }
    }
}

/// Targeted field-level patient update. `None` fields are left untouched,
/// so concurrent writers (the payment flow) are never clobbered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientFieldUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<Gender>,
    pub has_health_data: Option<bool>,
    pub has_prescription_data: Option<bool>,
}

impl PatientFieldUpdate {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.birth_date.is_none()
            && self.gender.is_none()
            && self.has_health_data.is_none()
            && self.has_prescription_data.is_none()
    }
}

/// Result of identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub patient_id: String,
    pub hospital_id: String,
    /// True when a new patient record was created.
    pub created: bool,
}

// --- Notification types ---

/// Event type on the per-session push channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Ordinary status transition.
    Status,
    /// Collection finished with data.
    Completed,
    /// The session entered an error state.
    Error,
}

/// A push event mirroring a session state transition.
///
/// Best-effort delivery: with no subscriber connected the event is dropped,
/// and the session document remains the source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub event_type: EventType,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    /// Builds an event for the given transition.
    pub fn now(event_type: EventType, status: SessionStatus, message: Option<String>) -> Self {
        Self {
            event_type,
            status,
            message,
            data: None,
            at: Utc::now(),
        }
    }
}
