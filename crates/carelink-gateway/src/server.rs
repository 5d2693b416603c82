// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state. The session id in the
//! path is the only credential: possession of the id grants access to that
//! session and nothing else.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use carelink_core::CarelinkError;
use carelink_session::SessionStateMachine;

use crate::handlers;
use crate::ws;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Session operations entry point.
    pub machine: Arc<SessionStateMachine>,
    /// Process start time for uptime reporting.
    pub start_time: std::time::Instant,
}

/// Gateway server configuration (mirrors ServerConfig from carelink-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

/// Builds the full gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/session", post(handlers::post_session))
        .route("/session/{id}", get(handlers::get_session))
        .route("/session/{id}", delete(handlers::delete_session))
        .route("/session/{id}/verify", post(handlers::post_verify))
        .route("/session/{id}/collect", post(handlers::post_collect))
        .route("/session/{id}/extend", post(handlers::post_extend))
        .route("/session/{id}/datasets", get(handlers::get_datasets))
        .route(
            "/session/{id}/report-started",
            post(handlers::post_report_started),
        )
        .route("/session/{id}/stream", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts the gateway HTTP/WebSocket server and serves until shutdown.
pub async fn start_server(config: &ServerConfig, state: GatewayState) -> Result<(), CarelinkError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CarelinkError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| CarelinkError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    Ok(())
}
