// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity-verification provider client.
//!
//! Wraps the provider's JSON-over-HTTP API behind the
//! [`carelink_core::IdentityProvider`] trait and classifies its error codes
//! into the outcomes the collection pipeline acts on.

pub mod classify;
pub mod client;

pub use client::{ProviderClient, ProviderClientConfig};
