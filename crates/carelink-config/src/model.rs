// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Carelink platform.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use serde::{Deserialize, Serialize};

/// Top-level Carelink configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to sensible
/// values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CarelinkConfig {
    /// Gateway HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity-verification provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Identity-resolution settings.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Session store settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Gateway HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8400
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Identity-verification provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport-level retries per provider call (429/5xx only).
    /// This bounds retries inside one call; the pipeline itself never
    /// re-runs a provider call silently.
    #[serde(default = "default_provider_max_retries")]
    pub max_retries: u32,

    /// Delay between transport retries, in milliseconds.
    #[serde(default = "default_provider_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            timeout_secs: default_provider_timeout_secs(),
            max_retries: default_provider_max_retries(),
            retry_backoff_ms: default_provider_retry_backoff_ms(),
        }
    }
}

fn default_provider_base_url() -> String {
    "https://verify.example.com/api".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_provider_max_retries() -> u32 {
    1
}

fn default_provider_retry_backoff_ms() -> u64 {
    1000
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Session time-to-live in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Grace window added to the TTL when a verification request is sent,
    /// so the out-of-band approval has time to happen.
    #[serde(default = "default_verify_grace_secs")]
    pub verify_grace_secs: u64,

    /// Wall-clock bound on one collection pipeline run. A run that has not
    /// finished within this bound marks the session errored instead of
    /// leaving it permanently fetching.
    #[serde(default = "default_collection_deadline_secs")]
    pub collection_deadline_secs: u64,

    /// Interval of the expired-session reaper task.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// How many of the latest log messages a snapshot carries.
    #[serde(default = "default_snapshot_messages")]
    pub snapshot_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            verify_grace_secs: default_verify_grace_secs(),
            collection_deadline_secs: default_collection_deadline_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            snapshot_messages: default_snapshot_messages(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    1800
}

fn default_verify_grace_secs() -> u64 {
    300
}

fn default_collection_deadline_secs() -> u64 {
    120
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_snapshot_messages() -> usize {
    20
}

/// Identity-resolution configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Hospital id used when a session carries none. Validated against the
    /// hospital store at resolution time, with a fallback to any active
    /// hospital when stale.
    #[serde(default)]
    pub default_hospital_id: Option<String>,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "carelink.db".to_string()
}
