// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Patient and hospital store traits.
//!
//! The relational store backing these is externally owned; the core only
//! consumes it through lookups, creates, and targeted field-level updates.

use async_trait::async_trait;

use crate::error::CarelinkError;
use crate::types::{NaturalKey, PatientFieldUpdate, PatientRecord};

/// Patient record access.
///
/// Implementations must not assume they are the sole writer -- records may
/// be touched concurrently by unrelated flows. `update_fields` therefore
/// applies only the fields present in the update, never a full-row
/// overwrite, and "record already exists" is expected, not exceptional.
#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn find_by_id(&self, uuid: &str) -> Result<Option<PatientRecord>, CarelinkError>;

    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<PatientRecord>, CarelinkError>;

    async fn create(&self, record: &PatientRecord) -> Result<(), CarelinkError>;

    /// Applies the non-`None` fields of `update` to the record.
    async fn update_fields(
        &self,
        uuid: &str,
        update: &PatientFieldUpdate,
    ) -> Result<(), CarelinkError>;
}

/// Hospital existence checks for resolver fallbacks.
#[async_trait]
pub trait HospitalStore: Send + Sync {
    /// True when a hospital with this id exists and is usable.
    async fn exists(&self, hospital_id: &str) -> Result<bool, CarelinkError>;

    /// Any active hospital id, used when the configured default is stale.
    async fn any_active(&self) -> Result<Option<String>, CarelinkError>;
}
