//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes within bounds)
//! - Detect listeners that would bind the same address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HubConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::HubConfig;

/// Smallest accepted read chunk.
pub const MIN_READ_CHUNK: usize = 512;
/// Largest accepted read chunk.
pub const MAX_READ_CHUNK: usize = 1024 * 1024;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config` and return every problem found.
pub fn validate_config(config: &HubConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::new("listeners", "at least one listener is required"));
    }

    let mut seen = HashSet::new();
    for (i, listener) in config.listeners.iter().enumerate() {
        let field = format!("listeners[{}]", i);
        match listener.bind_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if !seen.insert(addr) {
                    errors.push(ValidationError::new(
                        format!("{}.bind_address", field),
                        format!("{} is used by another listener", addr),
                    ));
                }
            }
            Err(_) => errors.push(ValidationError::new(
                format!("{}.bind_address", field),
                format!("invalid socket address {:?}", listener.bind_address),
            )),
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_connections", field),
                "must be greater than 0",
            ));
        }
        if let Some(tls) = &listener.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.tls", field),
                    "cert_path and key_path are required",
                ));
            }
        }
    }

    let conn = &config.connection;
    for (name, value) in [
        ("connection.idle_timeout_secs", conn.idle_timeout_secs),
        ("connection.handshake_timeout_secs", conn.handshake_timeout_secs),
        ("connection.close_grace_ms", conn.close_grace_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(name, "must be greater than 0"));
        }
    }
    if !(MIN_READ_CHUNK..=MAX_READ_CHUNK).contains(&conn.read_chunk_bytes) {
        errors.push(ValidationError::new(
            "connection.read_chunk_bytes",
            format!("must be between {} and {}", MIN_READ_CHUNK, MAX_READ_CHUNK),
        ));
    }
    if conn.max_request_bytes == 0 {
        errors.push(ValidationError::new("connection.max_request_bytes", "must be greater than 0"));
    }
    if conn.max_message_bytes == 0 {
        errors.push(ValidationError::new("connection.max_message_bytes", "must be greater than 0"));
    }
    if conn.max_pending_bytes == 0 {
        errors.push(ValidationError::new("connection.max_pending_bytes", "must be greater than 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ListenerConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&HubConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = HubConfig::default();
        config.listeners.push(ListenerConfig::default());
        config.listeners[0].max_connections = 0;
        config.connection.idle_timeout_secs = 0;
        config.connection.read_chunk_bytes = 16;
        config.connection.max_pending_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listeners[0].max_connections",
                "listeners[1].bind_address",
                "connection.idle_timeout_secs",
                "connection.read_chunk_bytes",
                "connection.max_pending_bytes",
            ]
        );
    }

    #[test]
    fn requires_a_listener() {
        let config = HubConfig {
            listeners: Vec::new(),
            ..HubConfig::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listeners");
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = HubConfig::default();
        config.observability.metrics_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
