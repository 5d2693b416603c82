// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classification of provider dataset-fetch responses into the closed
//! [`FetchOutcome`] taxonomy.
//!
//! The provider reports business failures as JSON `{"status": "Error",
//! "errorCode": ..., "errorMessage": ...}`, and signals "the user has not
//! approved the verification yet" by answering with an HTML page instead
//! of JSON. Both are mapped here; nothing outside this module interprets
//! provider error codes.

use carelink_core::types::FetchOutcome;

/// The user has not completed the out-of-band approval.
pub const CODE_NOT_APPROVED: &str = "AUTH_NOT_COMPLETED";

/// Supplied identity fields do not match the provider's records.
pub const CODES_MISMATCH: &[&str] = &["USER_INFO_MISMATCH", "IDENTITY_MISMATCH"];

/// Worth a human retry: the provider hiccuped, nothing is lost.
pub const CODES_TRANSIENT: &[&str] = &["RATE_LIMITED", "TEMPORARY_ERROR", "GATEWAY_TIMEOUT"];

/// Maps a provider error reply into an outcome.
///
/// Unknown codes are fatal with the raw payload preserved for support
/// diagnosis -- guessing retryability for an unknown failure against a
/// rate-limited third party is how silent loops start.
pub fn classify_error(code: Option<&str>, message: Option<&str>, raw: &str) -> FetchOutcome {
    match code {
        Some(CODE_NOT_APPROVED) => FetchOutcome::NotYetApproved,
        Some(c) if CODES_MISMATCH.contains(&c) => FetchOutcome::UserInfoMismatch {
            message: message
                .unwrap_or("supplied identity fields do not match provider records")
                .to_string(),
        },
        Some(c) if CODES_TRANSIENT.contains(&c) => FetchOutcome::Transient {
            code: Some(c.to_string()),
            message: message.unwrap_or("temporary provider failure").to_string(),
        },
        _ => FetchOutcome::Fatal {
            code: code.map(str::to_string),
            raw: raw.to_string(),
        },
    }
}

/// Heuristic for the provider's HTML-instead-of-JSON pending signal.
pub fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<')
}
