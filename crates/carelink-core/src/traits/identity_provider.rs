// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity-verification provider trait.

use async_trait::async_trait;

use crate::error::CarelinkError;
use crate::types::{
    DatasetKind, FetchOutcome, VerificationPoll, VerificationReply, VerificationRequest,
    VerifiedIdentity,
};

/// External identity-verification provider.
///
/// Implementations translate the provider's untyped over-the-wire JSON
/// (with its `status` discriminator) into the typed replies below. Provider
/// business failures are values, not errors -- `Err` is reserved for
/// transport and protocol breakage that survived the client's bounded
/// retries.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Asks the provider to start a verification for the given user.
    async fn request_verification(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationReply, CarelinkError>;

    /// Polls whether the out-of-band approval for `correlation_id` happened.
    async fn check_verification(
        &self,
        correlation_id: &str,
    ) -> Result<VerificationPoll, CarelinkError>;

    /// Fetches one dataset for a verified identity, classifying the
    /// provider's response into the closed [`FetchOutcome`] taxonomy.
    async fn fetch_dataset(
        &self,
        kind: DatasetKind,
        identity: &VerifiedIdentity,
    ) -> Result<FetchOutcome, CarelinkError>;
}
