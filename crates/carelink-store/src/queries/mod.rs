// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table family.

pub mod patients;
pub mod sessions;
