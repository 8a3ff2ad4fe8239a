//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (caps > 0, timeouts > 0)
//! - Detect incomplete TLS client identity
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HandlerConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::HandlerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &HandlerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let agent = &config.agent;

    if agent.max_sockets == Some(0) {
        errors.push(ValidationError {
            field: "agent.max_sockets",
            message: "must be greater than 0".into(),
        });
    }

    if agent.keep_alive && agent.keep_alive_timeout_ms == 0 {
        errors.push(ValidationError {
            field: "agent.keep_alive_timeout_ms",
            message: "must be greater than 0 when keep_alive is enabled".into(),
        });
    }

    if config.continue_timeout_ms == Some(0) {
        errors.push(ValidationError {
            field: "continue_timeout_ms",
            message: "must be greater than 0".into(),
        });
    }

    let tls = &agent.tls;
    if tls.cert_path.is_some() != tls.key_path.is_some() {
        errors.push(ValidationError {
            field: "agent.tls",
            message: "cert_path and key_path must be set together".into(),
        });
    }

    if matches!(tls.servername.as_deref(), Some(name) if name.trim().is_empty()) {
        errors.push(ValidationError {
            field: "agent.tls.servername",
            message: "must not be empty".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
