// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory patient and hospital stores for resolver tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use carelink_core::types::{NaturalKey, PatientFieldUpdate, PatientRecord};
use carelink_core::{CarelinkError, HospitalStore, PatientStore};

#[derive(Default)]
pub struct MemoryPatientStore {
    patients: Mutex<HashMap<String, PatientRecord>>,
}

impl MemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the trait.
    pub fn seed(&self, record: PatientRecord) {
        self.patients
            .lock()
            .unwrap()
            .insert(record.uuid.clone(), record);
    }

    /// Snapshot of a stored record for assertions.
    pub fn record(&self, uuid: &str) -> Option<PatientRecord> {
        self.patients.lock().unwrap().get(uuid).cloned()
    }

    pub fn len(&self) -> usize {
        self.patients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl PatientStore for MemoryPatientStore {
    async fn find_by_id(&self, uuid: &str) -> Result<Option<PatientRecord>, CarelinkError> {
        Ok(self.patients.lock().unwrap().get(uuid).cloned())
    }

    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<PatientRecord>, CarelinkError> {
        Ok(self
            .patients
            .lock()
            .unwrap()
            .values()
            .find(|p| p.name == key.name && p.birth_date == key.birthdate && p.phone == key.phone)
            .cloned())
    }

    async fn create(&self, record: &PatientRecord) -> Result<(), CarelinkError> {
        let mut patients = self.patients.lock().unwrap();
        if patients.contains_key(&record.uuid) {
            return Err(CarelinkError::Internal(format!(
                "patient {} already exists",
                record.uuid
            )));
        }
        patients.insert(record.uuid.clone(), record.clone());
        Ok(())
    }

    async fn update_fields(
        &self,
        uuid: &str,
        update: &PatientFieldUpdate,
    ) -> Result<(), CarelinkError> {
        let mut patients = self.patients.lock().unwrap();
        let record = patients
            .get_mut(uuid)
            .ok_or_else(|| CarelinkError::Internal(format!("patient {uuid} not found")))?;
        if let Some(name) = &update.name {
            record.name = name.clone();
        }
        if let Some(phone) = &update.phone {
            record.phone = phone.clone();
        }
        if let Some(birth_date) = &update.birth_date {
            record.birth_date = birth_date.clone();
        }
        if let Some(gender) = update.gender {
            record.gender = Some(gender);
        }
        if let Some(flag) = update.has_health_data {
            record.has_health_data = flag;
        }
        if let Some(flag) = update.has_prescription_data {
            record.has_prescription_data = flag;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHospitalStore {
    hospitals: Mutex<Vec<String>>,
}

impl MemoryHospitalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hospital_id: &str) {
        self.hospitals.lock().unwrap().push(hospital_id.to_string());
    }
}

#[async_trait]
impl HospitalStore for MemoryHospitalStore {
    async fn exists(&self, hospital_id: &str) -> Result<bool, CarelinkError> {
        Ok(self
            .hospitals
            .lock()
            .unwrap()
            .iter()
            .any(|h| h == hospital_id))
    }

    async fn any_active(&self) -> Result<Option<String>, CarelinkError> {
        Ok(self.hospitals.lock().unwrap().first().cloned())
    }
}
