// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Four-tier identity resolution.
//!
//! Invoked by the collection pipeline after both fetches. Resolution order,
//! first match wins:
//!
//! 1. Patient and hospital ids already linked on the session.
//! 2. A campaign-order session whose pre-verification user info matches an
//!    existing patient's natural key.
//! 3. Natural-key lookup from the verified identity.
//! 4. Create a new patient, picking a hospital from the session hint, the
//!    configured default, or any active hospital.
//!
//! Matches never overwrite populated identity fields on an existing record.
//! Verification arriving after a partner already supplied partial data must
//! enrich the record, not corrupt it, so updates are field-level and only
//! fill fields that are currently empty.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use carelink_core::types::{
    Dataset, NaturalKey, PatientFieldUpdate, PatientRecord, Resolution, VerifiedIdentity,
};
use carelink_core::{CarelinkError, HospitalStore, PatientStore, ResolveIdentity, Session};

pub struct IdentityResolver {
    patients: Arc<dyn PatientStore>,
    hospitals: Arc<dyn HospitalStore>,
    default_hospital_id: Option<String>,
}

impl IdentityResolver {
    pub fn new(
        patients: Arc<dyn PatientStore>,
        hospitals: Arc<dyn HospitalStore>,
        default_hospital_id: Option<String>,
    ) -> Self {
        Self {
            patients,
            hospitals,
            default_hospital_id,
        }
    }

    /// Applies the non-destructive enrichment to an existing record.
    async fn enrich(
        &self,
        record: &PatientRecord,
        session: &Session,
        identity: &VerifiedIdentity,
    ) -> Result<(), CarelinkError> {
        let update = fill_update(record, session, identity);
        if update.is_empty() {
            return Ok(());
        }
        self.patients.update_fields(&record.uuid, &update).await
    }

    /// Picks a hospital for a new patient record.
    ///
    /// Preference order: session hint, configured default, any active
    /// hospital. Every candidate is validated before use.
    async fn pick_hospital(&self, hint: Option<&str>) -> Result<String, CarelinkError> {
        if let Some(hint) = hint {
            if self.hospitals.exists(hint).await? {
                return Ok(hint.to_string());
            }
            warn!(hospital_id = hint, "session hospital hint does not exist");
        }
        if let Some(default) = &self.default_hospital_id {
            if self.hospitals.exists(default).await? {
                return Ok(default.clone());
            }
            warn!(hospital_id = %default, "configured default hospital is stale");
        }
        self.hospitals
            .any_active()
            .await?
            .ok_or_else(|| CarelinkError::Internal("no active hospital available".into()))
    }
}

#[async_trait]
impl ResolveIdentity for IdentityResolver {
    async fn resolve(&self, session: &Session) -> Result<Resolution, CarelinkError> {
        let identity = session
            .verified_identity
            .as_ref()
            .ok_or_else(|| CarelinkError::Internal("resolution requires a verified identity".into()))?;

        // Tier 1: identity established before verification (returning user).
        if let (Some(patient_id), Some(hospital_id)) = (
            session.external_links.patient_id.as_deref(),
            session.external_links.hospital_id.as_deref(),
        ) {
            if let Some(record) = self.patients.find_by_id(patient_id).await? {
                self.enrich(&record, session, identity).await?;
                info!(patient_id, hospital_id, "resolved via session link");
                return Ok(Resolution {
                    patient_id: patient_id.to_string(),
                    hospital_id: hospital_id.to_string(),
                    created: false,
                });
            }
            warn!(patient_id, "linked patient not found, trying lower tiers");
        }

        // Tier 2: campaign-order re-entry matched on the partner-supplied
        // pre-verification fields.
        if session.external_links.campaign_order_id.is_some() {
            let key = NaturalKey::from_user_info(&session.user_info);
            if let Some(record) = self.patients.find_by_natural_key(&key).await? {
                self.enrich(&record, session, identity).await?;
                info!(patient_id = %record.uuid, "resolved via campaign-order natural key");
                return Ok(Resolution {
                    patient_id: record.uuid.clone(),
                    hospital_id: record.hospital_id.clone(),
                    created: false,
                });
            }
        }

        // Tier 3: natural key from the verified identity.
        let key = NaturalKey::from_verified(identity);
        if let Some(record) = self.patients.find_by_natural_key(&key).await? {
            self.enrich(&record, session, identity).await?;
            info!(patient_id = %record.uuid, "resolved via verified natural key");
            return Ok(Resolution {
                patient_id: record.uuid.clone(),
                hospital_id: record.hospital_id.clone(),
                created: false,
            });
        }

        // Tier 4: first sighting, create the record.
        let hospital_id = self
            .pick_hospital(session.external_links.hospital_id.as_deref())
            .await?;
        let record = PatientRecord {
            uuid: uuid::Uuid::new_v4().to_string(),
            hospital_id: hospital_id.clone(),
            name: identity.name.clone(),
            phone: identity.phone.clone(),
            birth_date: identity.birthdate.clone(),
            gender: session.user_info.gender,
            has_health_data: has_records(&session.health_dataset),
            has_prescription_data: has_records(&session.prescription_dataset),
        };
        self.patients.create(&record).await?;
        info!(patient_id = %record.uuid, hospital_id = %hospital_id, "created patient record");
        Ok(Resolution {
            patient_id: record.uuid,
            hospital_id,
            created: true,
        })
    }
}

fn has_records(dataset: &Option<Dataset>) -> bool {
    dataset.as_ref().is_some_and(Dataset::has_records)
}

/// Builds the fill-empty-only update for an existing record.
///
/// Identity fields are taken from the verified identity and applied only
/// where the stored value is empty. Dataset flags move false -> true, never
/// back.
fn fill_update(
    record: &PatientRecord,
    session: &Session,
    identity: &VerifiedIdentity,
) -> PatientFieldUpdate {
    let mut update = PatientFieldUpdate::default();
    if record.name.trim().is_empty() && !identity.name.trim().is_empty() {
        update.name = Some(identity.name.clone());
    }
    if record.phone.trim().is_empty() && !identity.phone.trim().is_empty() {
        update.phone = Some(identity.phone.clone());
    }
    if record.birth_date.trim().is_empty() && !identity.birthdate.trim().is_empty() {
        update.birth_date = Some(identity.birthdate.clone());
    }
    if record.gender.is_none() {
        update.gender = session.user_info.gender;
    }
    if !record.has_health_data && has_records(&session.health_dataset) {
        update.has_health_data = Some(true);
    }
    if !record.has_prescription_data && has_records(&session.prescription_dataset) {
        update.has_prescription_data = Some(true);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{
        DatasetKind, ExternalLinks, Gender, UserInfo, VerificationMethod,
    };
    use carelink_test_utils::{MemoryHospitalStore, MemoryPatientStore};
    use chrono::{Duration, Utc};

    fn user_info() -> UserInfo {
        UserInfo {
            name: "Kim Jiwoo".into(),
            birthdate: "19900101".into(),
            phone: "01012345678".into(),
            gender: Some(Gender::Female),
            method: VerificationMethod::Kakao,
        }
    }

    fn session(links: ExternalLinks) -> Session {
        let mut session = Session::new(user_info(), links, Duration::minutes(30));
        session.verified_identity = Some(VerifiedIdentity {
            correlation_id: "c-1".into(),
            name: "Kim Jiwoo".into(),
            birthdate: "19900101".into(),
            phone: "01012345678".into(),
        });
        session.health_dataset = Some(Dataset {
            kind: DatasetKind::Health,
            provider_status: "OK".into(),
            records: vec![serde_json::json!({"year": "2024"})],
            fetched_at: Utc::now(),
        });
        session.prescription_dataset = Some(Dataset {
            kind: DatasetKind::Prescription,
            provider_status: "OK".into(),
            records: vec![],
            fetched_at: Utc::now(),
        });
        session
    }

    fn patient(uuid: &str, hospital: &str) -> PatientRecord {
        PatientRecord {
            uuid: uuid.into(),
            hospital_id: hospital.into(),
            name: "Kim Jiwoo".into(),
            phone: "01012345678".into(),
            birth_date: "19900101".into(),
            gender: None,
            has_health_data: false,
            has_prescription_data: false,
        }
    }

    struct Fixture {
        patients: Arc<MemoryPatientStore>,
        hospitals: Arc<MemoryHospitalStore>,
    }

    fn fixture() -> Fixture {
        let hospitals = Arc::new(MemoryHospitalStore::new());
        hospitals.register("h-1");
        Fixture {
            patients: Arc::new(MemoryPatientStore::new()),
            hospitals,
        }
    }

    fn resolver(f: &Fixture, default_hospital: Option<&str>) -> IdentityResolver {
        IdentityResolver::new(
            f.patients.clone(),
            f.hospitals.clone(),
            default_hospital.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn linked_session_resolves_directly() {
        let f = fixture();
        f.patients.seed(patient("p-1", "h-1"));
        let links = ExternalLinks {
            patient_id: Some("p-1".into()),
            hospital_id: Some("h-1".into()),
            ..ExternalLinks::default()
        };

        let resolution = resolver(&f, None).resolve(&session(links)).await.unwrap();
        assert_eq!(resolution.patient_id, "p-1");
        assert_eq!(resolution.hospital_id, "h-1");
        assert!(!resolution.created);
    }

    #[tokio::test]
    async fn populated_fields_are_never_overwritten() {
        let f = fixture();
        let mut stored = patient("p-1", "h-1");
        stored.phone = "01099998888".into(); // differs from the verified phone
        f.patients.seed(stored);
        let links = ExternalLinks {
            patient_id: Some("p-1".into()),
            hospital_id: Some("h-1".into()),
            ..ExternalLinks::default()
        };

        resolver(&f, None).resolve(&session(links)).await.unwrap();
        let record = f.patients.record("p-1").unwrap();
        assert_eq!(record.phone, "01099998888");
    }

    #[tokio::test]
    async fn empty_fields_are_filled_from_verified_identity() {
        let f = fixture();
        let mut stored = patient("p-1", "h-1");
        stored.phone = String::new();
        stored.gender = None;
        f.patients.seed(stored);
        let links = ExternalLinks {
            patient_id: Some("p-1".into()),
            hospital_id: Some("h-1".into()),
            ..ExternalLinks::default()
        };

        resolver(&f, None).resolve(&session(links)).await.unwrap();
        let record = f.patients.record("p-1").unwrap();
        assert_eq!(record.phone, "01012345678");
        assert_eq!(record.gender, Some(Gender::Female));
        assert!(record.has_health_data);
        // Prescription dataset was empty: flag stays false.
        assert!(!record.has_prescription_data);
    }

    #[tokio::test]
    async fn campaign_order_matches_preverification_natural_key() {
        let f = fixture();
        f.patients.seed(patient("p-2", "h-1"));
        let links = ExternalLinks {
            campaign_order_id: Some("order-1".into()),
            ..ExternalLinks::default()
        };

        let resolution = resolver(&f, None).resolve(&session(links)).await.unwrap();
        assert_eq!(resolution.patient_id, "p-2");
        assert!(!resolution.created);
    }

    #[tokio::test]
    async fn natural_key_lookup_reuses_existing_patient() {
        let f = fixture();
        f.patients.seed(patient("p-3", "h-1"));

        let resolution = resolver(&f, None)
            .resolve(&session(ExternalLinks::default()))
            .await
            .unwrap();
        assert_eq!(resolution.patient_id, "p-3");
        assert!(!resolution.created);
        assert_eq!(f.patients.len(), 1);
    }

    #[tokio::test]
    async fn unknown_identity_creates_patient_with_default_hospital() {
        let f = fixture();

        let resolution = resolver(&f, Some("h-1"))
            .resolve(&session(ExternalLinks::default()))
            .await
            .unwrap();
        assert!(resolution.created);
        assert_eq!(resolution.hospital_id, "h-1");
        let record = f.patients.record(&resolution.patient_id).unwrap();
        assert_eq!(record.name, "Kim Jiwoo");
        assert!(record.has_health_data);
        assert!(!record.has_prescription_data);
    }

    #[tokio::test]
    async fn stale_default_hospital_falls_back_to_any_active() {
        let f = fixture();

        let resolution = resolver(&f, Some("h-gone"))
            .resolve(&session(ExternalLinks::default()))
            .await
            .unwrap();
        assert!(resolution.created);
        assert_eq!(resolution.hospital_id, "h-1");
    }

    #[tokio::test]
    async fn no_hospital_anywhere_is_an_error() {
        let f = Fixture {
            patients: Arc::new(MemoryPatientStore::new()),
            hospitals: Arc::new(MemoryHospitalStore::new()),
        };

        let err = resolver(&f, None)
            .resolve(&session(ExternalLinks::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, CarelinkError::Internal(_)));
    }

    #[tokio::test]
    async fn missing_linked_patient_falls_through_to_create() {
        let f = fixture();
        let links = ExternalLinks {
            patient_id: Some("p-gone".into()),
            hospital_id: Some("h-1".into()),
            ..ExternalLinks::default()
        };

        let resolution = resolver(&f, None).resolve(&session(links)).await.unwrap();
        assert!(resolution.created);
        assert_eq!(f.patients.len(), 1);
    }
}
