// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! Every session operation answers with the client-facing
//! [`carelink_core::SessionView`] snapshot. Suppressed duplicates are 200
//! responses tagged `duplicate: true`, never errors, so client retry loops
//! stay simple.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use carelink_core::types::{ExternalLinks, Gender, UserInfo, VerificationMethod};
use carelink_core::{CarelinkError, SessionView};

use crate::server::GatewayState;

/// Request body for POST /session.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub name: String,
    /// Birthdate in `YYYYMMDD` form.
    pub birthdate: String,
    pub phone: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub method: VerificationMethod,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub hospital_id: Option<String>,
    #[serde(default)]
    pub campaign_order_id: Option<String>,
    #[serde(default)]
    pub entry_path: Option<String>,
}

/// Request body for POST /session/{id}/extend.
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub seconds: u64,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub subscribers: usize,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// [`CarelinkError`] to HTTP status mapping.
pub struct ApiError(CarelinkError);

impl From<CarelinkError> for ApiError {
    fn from(err: CarelinkError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CarelinkError::Validation(_) => StatusCode::BAD_REQUEST,
            CarelinkError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<SessionView>, ApiError>;

/// POST /session
pub async fn post_session(
    State(state): State<GatewayState>,
    Json(body): Json<StartRequest>,
) -> ApiResult {
    let user_info = UserInfo {
        name: body.name,
        birthdate: body.birthdate,
        phone: body.phone,
        gender: body.gender,
        method: body.method,
    };
    let external_links = ExternalLinks {
        patient_id: body.patient_id,
        hospital_id: body.hospital_id,
        campaign_order_id: body.campaign_order_id,
        entry_path: body.entry_path,
    };
    let view = state.machine.start(user_info, external_links).await?;
    Ok(Json(view))
}

/// POST /session/{id}/verify
pub async fn post_verify(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(Json(state.machine.request_verification(&id).await?))
}

/// POST /session/{id}/collect
pub async fn post_collect(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(Json(state.machine.confirm_and_collect(&id).await?))
}

/// GET /session/{id}
pub async fn get_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(Json(state.machine.status(&id).await?))
}

/// DELETE /session/{id}
pub async fn delete_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.machine.cleanup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /session/{id}/extend
pub async fn post_extend(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<ExtendRequest>,
) -> ApiResult {
    Ok(Json(state.machine.extend(&id, body.seconds).await?))
}

/// GET /session/{id}/datasets
///
/// Downstream hook for the report pipeline: 409 until collection has
/// completed, the datasets afterwards.
pub async fn get_datasets(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.machine.completed_datasets(&id).await? {
        Some(datasets) => Ok(Json(datasets).into_response()),
        None => Ok((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "collection has not completed for this session".to_string(),
            }),
        )
            .into_response()),
    }
}

/// POST /session/{id}/report-started
pub async fn post_report_started(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(Json(state.machine.report_started(&id).await?))
}

/// GET /health (public)
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        subscribers: state.machine.hub().subscriber_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_deserializes_minimal() {
        let json = r#"{"name": "Kim", "birthdate": "19900101", "phone": "01012345678", "method": "kakao"}"#;
        let body: StartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(body.name, "Kim");
        assert!(body.campaign_order_id.is_none());
    }

    #[test]
    fn start_request_deserializes_campaign_entry() {
        let json = r#"{
            "name": "Kim", "birthdate": "19900101", "phone": "01012345678",
            "method": "pass", "gender": "female",
            "campaign_order_id": "order-1", "hospital_id": "h-1"
        }"#;
        let body: StartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(body.method, VerificationMethod::Pass);
        assert_eq!(body.gender, Some(Gender::Female));
        assert_eq!(body.campaign_order_id.as_deref(), Some("order-1"));
    }

    #[test]
    fn validation_error_maps_to_bad_request() {
        let response = ApiError(CarelinkError::Validation("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError(CarelinkError::NotFound {
            session_id: "s-1".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn storage_error_maps_to_500() {
        let response = ApiError(CarelinkError::Storage {
            source: Box::new(std::io::Error::other("disk gone")),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
