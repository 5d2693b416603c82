// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles shared across the workspace: a scripted identity provider,
//! in-memory session/patient/hospital stores, a capturing pipeline
//! spawner, and a fixed-answer resolver.

pub mod memory_store;
pub mod mock_patients;
pub mod mock_provider;
pub mod resolver;
pub mod spawner;

pub use memory_store::MemorySessionStore;
pub use mock_patients::{MemoryHospitalStore, MemoryPatientStore};
pub use mock_provider::MockProvider;
pub use resolver::FixedResolver;
pub use spawner::QueueSpawner;
