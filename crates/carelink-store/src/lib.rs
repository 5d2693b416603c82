// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Carelink platform.
//!
//! Provides the [`SqliteSessionStore`] (session documents with TTL and the
//! atomic read-modify-write primitive) and the bundled
//! [`SqlitePatientStore`]/[`SqliteHospitalStore`] adapters. All access goes
//! through one tokio-rusqlite connection whose background thread serializes
//! writes.

pub mod database;
pub mod migrations;
pub mod patient_store;
pub mod queries;
pub mod session_store;

pub use database::Database;
pub use patient_store::{SqliteHospitalStore, SqlitePatientStore};
pub use session_store::SqliteSessionStore;
