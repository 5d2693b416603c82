// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the patient and hospital store traits.
//!
//! This adapter stands in for the externally-owned relational store so a
//! single-node deployment runs end to end. The resolver only ever sees the
//! traits, so swapping in the real store is a wiring change.

use async_trait::async_trait;

use carelink_core::types::{NaturalKey, PatientFieldUpdate, PatientRecord};
use carelink_core::{CarelinkError, HospitalStore, PatientStore};

use crate::database::Database;
use crate::queries;

/// SQLite-backed patient store.
pub struct SqlitePatientStore {
    db: Database,
}

impl SqlitePatientStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PatientStore for SqlitePatientStore {
    async fn find_by_id(&self, uuid: &str) -> Result<Option<PatientRecord>, CarelinkError> {
        queries::patients::find_by_id(&self.db, uuid).await
    }

    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<PatientRecord>, CarelinkError> {
        queries::patients::find_by_natural_key(&self.db, key).await
    }

    async fn create(&self, record: &PatientRecord) -> Result<(), CarelinkError> {
        queries::patients::insert(&self.db, record).await
    }

    async fn update_fields(
        &self,
        uuid: &str,
        update: &PatientFieldUpdate,
    ) -> Result<(), CarelinkError> {
        queries::patients::update_fields(&self.db, uuid, update).await
    }
}

/// SQLite-backed hospital store.
pub struct SqliteHospitalStore {
    db: Database,
}

impl SqliteHospitalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a hospital (ops tooling and tests).
    pub async fn register(
        &self,
        hospital_id: &str,
        name: &str,
        active: bool,
    ) -> Result<(), CarelinkError> {
        queries::patients::insert_hospital(&self.db, hospital_id, name, active).await
    }
}

#[async_trait]
impl HospitalStore for SqliteHospitalStore {
    async fn exists(&self, hospital_id: &str) -> Result<bool, CarelinkError> {
        queries::patients::hospital_exists(&self.db, hospital_id).await
    }

    async fn any_active(&self) -> Result<Option<String>, CarelinkError> {
        queries::patients::any_active_hospital(&self.db).await
    }
}
