// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation with actionable messages.

use crate::model::CarelinkConfig;

/// A single configuration problem: the offending key and what to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Validates constraints that serde types cannot express.
pub fn validate_config(config: &CarelinkConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.provider.base_url.trim().is_empty() {
        errors.push(ConfigError {
            key: "provider.base_url".into(),
            message: "must not be empty".into(),
        });
    } else if !config.provider.base_url.starts_with("http://")
        && !config.provider.base_url.starts_with("https://")
    {
        errors.push(ConfigError {
            key: "provider.base_url".into(),
            message: format!(
                "expected an http(s) URL, got {:?}",
                config.provider.base_url
            ),
        });
    }

    if config.session.ttl_secs == 0 {
        errors.push(ConfigError {
            key: "session.ttl_secs".into(),
            message: "must be greater than zero".into(),
        });
    }

    if config.session.collection_deadline_secs == 0 {
        errors.push(ConfigError {
            key: "session.collection_deadline_secs".into(),
            message: "must be greater than zero".into(),
        });
    }

    if config.session.snapshot_messages == 0 {
        errors.push(ConfigError {
            key: "session.snapshot_messages".into(),
            message: "must be at least 1".into(),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError {
            key: "storage.database_path".into(),
            message: "must not be empty".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Renders validation errors to stderr, one per line.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        eprintln!("carelink: config error: {error}");
    }
}
