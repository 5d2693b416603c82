// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Patient and hospital queries for the bundled store adapter.

use std::str::FromStr;

use carelink_core::types::{Gender, NaturalKey, PatientFieldUpdate, PatientRecord};
use carelink_core::CarelinkError;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::database::Database;

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<PatientRecord> {
    let gender: Option<String> = row.get(5)?;
    Ok(PatientRecord {
        uuid: row.get(0)?,
        hospital_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        birth_date: row.get(4)?,
        gender: gender.and_then(|g| Gender::from_str(&g).ok()),
        has_health_data: row.get(6)?,
        has_prescription_data: row.get(7)?,
    })
}

const PATIENT_COLUMNS: &str =
    "uuid, hospital_id, name, phone, birth_date, gender, has_health_data, has_prescription_data";

/// Get a patient by primary key.
pub async fn find_by_id(
    db: &Database,
    uuid: &str,
) -> Result<Option<PatientRecord>, CarelinkError> {
    let uuid = uuid.to_string();
    db.connection()
        .call(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE uuid = ?1"),
                    params![uuid],
                    row_to_patient,
                )
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a patient by the (phone, birthdate, name) natural key.
pub async fn find_by_natural_key(
    db: &Database,
    key: &NaturalKey,
) -> Result<Option<PatientRecord>, CarelinkError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {PATIENT_COLUMNS} FROM patients
                         WHERE phone = ?1 AND birth_date = ?2 AND name = ?3"
                    ),
                    params![key.phone, key.birthdate, key.name],
                    row_to_patient,
                )
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert a new patient record.
pub async fn insert(db: &Database, record: &PatientRecord) -> Result<(), CarelinkError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO patients
                     (uuid, hospital_id, name, phone, birth_date, gender,
                      has_health_data, has_prescription_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.uuid,
                    record.hospital_id,
                    record.name,
                    record.phone,
                    record.birth_date,
                    record.gender.map(|g| g.to_string()),
                    record.has_health_data,
                    record.has_prescription_data,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Apply only the fields present in `update`. A fully empty update is a no-op.
pub async fn update_fields(
    db: &Database,
    uuid: &str,
    update: &PatientFieldUpdate,
) -> Result<(), CarelinkError> {
    if update.is_empty() {
        return Ok(());
    }
    let uuid = uuid.to_string();
    let update = update.clone();
    db.connection()
        .call(move |conn| {
            let mut sets: Vec<&str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql + Send>> = Vec::new();
            if let Some(name) = update.name {
                sets.push("name = ?");
                values.push(Box::new(name));
            }
            if let Some(phone) = update.phone {
                sets.push("phone = ?");
                values.push(Box::new(phone));
            }
            if let Some(birth_date) = update.birth_date {
                sets.push("birth_date = ?");
                values.push(Box::new(birth_date));
            }
            if let Some(gender) = update.gender {
                sets.push("gender = ?");
                values.push(Box::new(gender.to_string()));
            }
            if let Some(flag) = update.has_health_data {
                sets.push("has_health_data = ?");
                values.push(Box::new(flag));
            }
            if let Some(flag) = update.has_prescription_data {
                sets.push("has_prescription_data = ?");
                values.push(Box::new(flag));
            }
            values.push(Box::new(uuid));
            let sql = format!("UPDATE patients SET {} WHERE uuid = ?", sets.join(", "));
            conn.execute(
                &sql,
                params_from_iter(values.iter().map(|v| v.as_ref() as &dyn ToSql)),
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// True when an active hospital with this id exists.
pub async fn hospital_exists(db: &Database, hospital_id: &str) -> Result<bool, CarelinkError> {
    let hospital_id = hospital_id.to_string();
    db.connection()
        .call(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM hospitals WHERE hospital_id = ?1 AND active = 1",
                    params![hospital_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Any active hospital id, used as a last-resort resolver fallback.
pub async fn any_active_hospital(db: &Database) -> Result<Option<String>, CarelinkError> {
    db.connection()
        .call(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT hospital_id FROM hospitals WHERE active = 1
                     ORDER BY hospital_id LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Register a hospital (used by ops tooling and tests).
pub async fn insert_hospital(
    db: &Database,
    hospital_id: &str,
    name: &str,
    active: bool,
) -> Result<(), CarelinkError> {
    let hospital_id = hospital_id.to_string();
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO hospitals (hospital_id, name, active)
                 VALUES (?1, ?2, ?3)",
                params![hospital_id, name, active],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
