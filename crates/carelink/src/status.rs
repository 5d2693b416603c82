// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `carelink status` command implementation.
//!
//! Queries the gateway health endpoint and reports whether the server is
//! running, falling back gracefully when it is not.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use carelink_config::model::CarelinkConfig;
use carelink_core::CarelinkError;

/// Health endpoint response from the gateway.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    subscribers: usize,
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
    status: String,
    version: Option<String>,
    uptime_secs: Option<u64>,
    subscribers: Option<usize>,
    server_host: String,
    server_port: u16,
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Runs the `carelink status` command.
pub async fn run_status(config: &CarelinkConfig, json: bool) -> Result<(), CarelinkError> {
    let host = &config.server.host;
    let port = config.server.port;
    let url = format!("http://{host}:{port}/health");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .map_err(|e| CarelinkError::Channel {
            message: format!("failed to build status client: {e}"),
            source: Some(Box::new(e)),
        })?;

    let health: Option<HealthResponse> = match client.get(&url).send().await {
        Ok(response) => response.json().await.ok(),
        Err(_) => None,
    };

    let output = match &health {
        Some(health) => StatusResponse {
            running: true,
            status: health.status.clone(),
            version: Some(health.version.clone()),
            uptime_secs: Some(health.uptime_secs),
            subscribers: Some(health.subscribers),
            server_host: host.clone(),
            server_port: port,
        },
        None => StatusResponse {
            running: false,
            status: "not running".to_string(),
            version: None,
            uptime_secs: None,
            subscribers: None,
            server_host: host.clone(),
            server_port: port,
        },
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    match health {
        Some(health) => {
            println!("carelink {} is {}", health.version, health.status);
            println!("  gateway:     http://{host}:{port}");
            println!("  uptime:      {}", format_uptime(health.uptime_secs));
            println!("  subscribers: {}", health.subscribers);
        }
        None => {
            println!("carelink is not running on {host}:{port}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formats_by_magnitude() {
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(3660), "1h 1m");
        assert_eq!(format_uptime(90061), "1d 1h 1m");
    }
}
