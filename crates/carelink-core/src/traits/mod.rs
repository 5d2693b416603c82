// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the Carelink core.
//!
//! Every external collaborator (session store, identity-verification
//! provider, patient/hospital store, resolver, task spawner) is consumed
//! through a trait defined here, using `#[async_trait]` for dynamic
//! dispatch compatibility.

pub mod identity_provider;
pub mod patient_store;
pub mod resolver;
pub mod session_store;
pub mod spawner;

pub use identity_provider::IdentityProvider;
pub use patient_store::{HospitalStore, PatientStore};
pub use resolver::ResolveIdentity;
pub use session_store::{MutateFn, SessionStore};
pub use spawner::PipelineSpawner;
