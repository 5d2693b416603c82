// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity resolution against the patient store.

pub mod resolver;

pub use resolver::IdentityResolver;
