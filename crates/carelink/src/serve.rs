// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `carelink serve` command implementation.
//!
//! Wires the sqlite stores, the provider client, the resolver, the session
//! state machine, and the gateway together, spawns the expired-session
//! reaper, and serves until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use carelink_config::model::CarelinkConfig;
use carelink_core::CarelinkError;
use carelink_gateway::{GatewayState, ServerConfig, start_server};
use carelink_provider::{ProviderClient, ProviderClientConfig};
use carelink_resolver::IdentityResolver;
use carelink_session::{
    CollectionPipeline, NotificationHub, SessionSettings, SessionStateMachine, TokioSpawner,
};
use carelink_store::{SqliteHospitalStore, SqlitePatientStore, SqliteSessionStore};

use crate::shutdown;

/// Runs the `carelink serve` command.
pub async fn run_serve(config: CarelinkConfig) -> Result<(), CarelinkError> {
    init_tracing(&config.server.log_level);

    info!("starting carelink serve");

    let session_store = Arc::new(SqliteSessionStore::open(&config.storage.database_path).await?);
    let db = session_store.database().clone();
    let patients = Arc::new(SqlitePatientStore::new(db.clone()));
    let hospitals = Arc::new(SqliteHospitalStore::new(db));

    let provider = Arc::new(ProviderClient::new(ProviderClientConfig {
        base_url: config.provider.base_url.clone(),
        timeout: Duration::from_secs(config.provider.timeout_secs),
        max_retries: config.provider.max_retries,
        retry_backoff: Duration::from_millis(config.provider.retry_backoff_ms),
    })?);

    let hub = Arc::new(NotificationHub::new());
    let resolver = Arc::new(IdentityResolver::new(
        patients,
        hospitals,
        config.resolver.default_hospital_id.clone(),
    ));
    let pipeline = Arc::new(CollectionPipeline::new(
        session_store.clone(),
        provider.clone(),
        resolver,
        hub.clone(),
        Duration::from_secs(config.session.collection_deadline_secs),
    ));
    let machine = Arc::new(SessionStateMachine::new(
        session_store,
        provider,
        hub,
        pipeline,
        Arc::new(TokioSpawner),
        SessionSettings::new(
            config.session.ttl_secs,
            config.session.verify_grace_secs,
            config.session.snapshot_messages,
        ),
    ));

    let cancel = shutdown::install_signal_handler();

    let reaper = {
        let machine = machine.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.session.reaper_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = machine.cleanup_expired().await {
                            warn!(error = %e, "session reaper pass failed");
                        }
                    }
                }
            }
        })
    };

    let state = GatewayState {
        machine,
        start_time: std::time::Instant::now(),
    };
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };

    tokio::select! {
        result = start_server(&server_config, state) => result?,
        _ = cancel.cancelled() => {
            info!("shutdown signal received");
        }
    }

    reaper.abort();
    info!("carelink serve shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber, honoring `RUST_LOG` overrides.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("carelink={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
