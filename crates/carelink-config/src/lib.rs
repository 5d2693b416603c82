// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Carelink platform.
//!
//! Provides TOML configuration parsing with strict validation
//! (`deny_unknown_fields`), XDG file hierarchy lookup, and environment
//! variable overrides.
//!
//! # Usage
//!
//! ```no_run
//! use carelink_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("binding {}:{}", config.server.host, config.server.port);
//! ```

pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::CarelinkConfig;
pub use validation::{render_errors, ConfigError};

use carelink_core::CarelinkError;

/// Load configuration from the XDG hierarchy and validate it.
pub fn load_and_validate() -> Result<CarelinkConfig, Vec<ConfigError>> {
    let config = loader::load_config().map_err(figment_to_errors)?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a TOML string and validate it.
///
/// Useful for testing and explicit configuration.
pub fn load_and_validate_str(toml_content: &str) -> Result<CarelinkConfig, Vec<ConfigError>> {
    let config = loader::load_config_from_str(toml_content).map_err(figment_to_errors)?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Load configuration from an explicit path and validate it.
pub fn load_and_validate_path(
    path: &std::path::Path,
) -> Result<CarelinkConfig, Vec<ConfigError>> {
    let config = loader::load_config_from_path(path).map_err(figment_to_errors)?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Converts a figment extraction error into the plain diagnostic form.
fn figment_to_errors(err: figment::Error) -> Vec<ConfigError> {
    err.into_iter()
        .map(|e| ConfigError {
            key: e.path.join("."),
            message: e.kind.to_string(),
        })
        .collect()
}

/// Folds a list of config errors into a single [`CarelinkError::Config`].
pub fn into_config_error(errors: Vec<ConfigError>) -> CarelinkError {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    CarelinkError::Config(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_str_catches_semantic_errors() {
        let errors = load_and_validate_str(
            r#"
            [session]
            ttl_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| e.key == "session.ttl_secs"));
    }

    #[test]
    fn validate_str_accepts_defaults() {
        let config = load_and_validate_str("").unwrap();
        assert_eq!(config.session.verify_grace_secs, 300);
    }

    #[test]
    fn into_config_error_joins_messages() {
        let err = into_config_error(vec![
            ConfigError {
                key: "a".into(),
                message: "bad".into(),
            },
            ConfigError {
                key: "b".into(),
                message: "worse".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("a: bad"));
        assert!(text.contains("b: worse"));
    }
}
