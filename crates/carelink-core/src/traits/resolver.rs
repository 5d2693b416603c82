// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity resolution trait, implemented by `carelink-resolver`.

use async_trait::async_trait;

use crate::error::CarelinkError;
use crate::types::{Resolution, Session};

/// Merges session user-info, pre-verification partner data, and
/// provider-verified identity into a single patient record.
///
/// The collection pipeline depends on this seam rather than on a concrete
/// resolver so the two can be tested independently.
#[async_trait]
pub trait ResolveIdentity: Send + Sync {
    /// Resolves the session to a patient record, creating one if needed.
    ///
    /// Must never delete or blindly overwrite identity fields on an
    /// existing record: verification arriving after partner-supplied data
    /// enriches, never corrupts.
    async fn resolve(&self, session: &Session) -> Result<Resolution, CarelinkError>;
}
