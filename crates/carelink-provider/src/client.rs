// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the identity-verification provider.
//!
//! The provider speaks untyped JSON with a `status` discriminator:
//!
//! - `POST /v1/verification` -> `{"status": "OK", "correlationId": "..."}`
//!   (an OK without a correlation id means the verification channel is
//!   unreachable for this user), or `{"status": "Error", "errorCode": ...,
//!   "errorMessage": ...}`.
//! - `POST /v1/verification/status` -> `{"status": "OK", "verified": bool}`.
//! - `POST /v1/dataset/{kind}` -> `{"status": "OK", "records": [...]}` on
//!   success; an HTML page instead of JSON while the user has not approved
//!   yet; JSON errors classified via [`crate::classify`].
//!
//! Transient HTTP failures (429/5xx) are retried a bounded number of times
//! before the reply is handed to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use carelink_core::types::{
    DatasetKind, FetchOutcome, VerificationPoll, VerificationReply, VerificationRequest,
    VerifiedIdentity,
};
use carelink_core::{CarelinkError, IdentityProvider};

use crate::classify;

/// Connection settings for [`ProviderClient`].
#[derive(Debug, Clone)]
pub struct ProviderClientConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Transport-level retries per call (429/5xx only).
    pub max_retries: u32,
    /// Delay between transport retries.
    pub retry_backoff: Duration,
}

/// HTTP client for provider communication.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Final HTTP reply after the retry loop.
struct RawReply {
    status: reqwest::StatusCode,
    body: String,
}

impl ProviderClient {
    /// Creates a new provider client.
    pub fn new(config: ProviderClientConfig) -> Result<Self, CarelinkError> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| CarelinkError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    /// Posts `body` to `path`, retrying transient HTTP failures.
    ///
    /// Returns the final reply -- including non-2xx replies, which the
    /// caller interprets. `Err` is reserved for transport failures that
    /// survived the retries.
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<RawReply, CarelinkError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_error: Option<CarelinkError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, url = %url, "retrying provider request after transient failure");
                tokio::time::sleep(self.retry_backoff).await;
            }

            let response = match self.client.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(CarelinkError::Provider {
                        message: format!("provider request failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                    continue;
                }
            };

            let status = response.status();
            debug!(status = %status, attempt, url = %url, "provider response received");

            if is_transient_status(status) && attempt < self.max_retries {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "transient provider status, will retry");
                continue;
            }

            let body = response.text().await.map_err(|e| CarelinkError::Provider {
                message: format!("failed to read provider response body: {e}"),
                source: Some(Box::new(e)),
            })?;
            return Ok(RawReply { status, body });
        }

        Err(last_error.unwrap_or_else(|| CarelinkError::Provider {
            message: "provider request failed after retries".into(),
            source: None,
        }))
    }
}

/// Returns true for HTTP status codes worth a bounded transport retry.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn status_is_ok(value: &serde_json::Value) -> bool {
    value.get("status").and_then(|v| v.as_str()) == Some("OK")
}

#[async_trait]
impl IdentityProvider for ProviderClient {
    async fn request_verification(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationReply, CarelinkError> {
        let body = serde_json::json!({
            "method": request.method,
            "name": request.name,
            "birthdate": request.birthdate,
            "phone": request.phone,
        });
        let reply = self.post_json("v1/verification", &body).await?;

        let value: serde_json::Value =
            serde_json::from_str(&reply.body).map_err(|_| CarelinkError::Provider {
                message: format!(
                    "provider returned non-JSON verification reply ({})",
                    reply.status
                ),
                source: None,
            })?;

        if status_is_ok(&value) {
            return Ok(match json_str(&value, "correlationId") {
                Some(correlation_id) => VerificationReply::Accepted { correlation_id },
                None => VerificationReply::ChannelUnreachable,
            });
        }
        Ok(VerificationReply::Rejected {
            code: json_str(&value, "errorCode"),
            message: json_str(&value, "errorMessage"),
        })
    }

    async fn check_verification(
        &self,
        correlation_id: &str,
    ) -> Result<VerificationPoll, CarelinkError> {
        let body = serde_json::json!({ "correlationId": correlation_id });
        let reply = self.post_json("v1/verification/status", &body).await?;

        // The provider answers some pending polls with an HTML page, same
        // quirk as dataset fetches.
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&reply.body) else {
            return Ok(VerificationPoll::Pending);
        };

        if status_is_ok(&value) {
            return Ok(
                if value.get("verified").and_then(|v| v.as_bool()) == Some(true) {
                    VerificationPoll::Completed
                } else {
                    VerificationPoll::Pending
                },
            );
        }
        Ok(VerificationPoll::Failed {
            code: json_str(&value, "errorCode"),
            message: json_str(&value, "errorMessage"),
        })
    }

    async fn fetch_dataset(
        &self,
        kind: DatasetKind,
        identity: &VerifiedIdentity,
    ) -> Result<FetchOutcome, CarelinkError> {
        let body = serde_json::json!({
            "correlationId": identity.correlation_id,
            "name": identity.name,
            "birthdate": identity.birthdate,
            "phone": identity.phone,
        });
        let reply = self.post_json(&format!("v1/dataset/{kind}"), &body).await?;

        let Ok(value) = serde_json::from_str::<serde_json::Value>(&reply.body) else {
            if classify::looks_like_html(&reply.body) {
                debug!(kind = %kind, "provider answered HTML: verification not yet approved");
                return Ok(FetchOutcome::NotYetApproved);
            }
            return Ok(FetchOutcome::Transient {
                code: None,
                message: format!("provider returned unreadable reply ({})", reply.status),
            });
        };

        if status_is_ok(&value) {
            let records = value
                .get("records")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            return Ok(FetchOutcome::Records(records));
        }

        let code = json_str(&value, "errorCode");
        let message = json_str(&value, "errorMessage");
        Ok(classify::classify_error(
            code.as_deref(),
            message.as_deref(),
            &reply.body,
        ))
    }
}
