#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, net::SocketAddr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::models::{FilterEntry, GatewayConfig, WorkerPoolConfig};

static APPLICATION_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$"));

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Filter conflict detected: {message}")]
    FilterConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_application(&config.application) {
            errors.push(e);
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        if let Some(pool) = &config.worker_pool {
            errors.extend(Self::validate_worker_pool(pool));
        }

        errors.extend(Self::validate_filters(&config.filters));

        if let Err(e) = Self::validate_url(&config.rpc.endpoint, "rpc.endpoint") {
            errors.push(e);
        }

        if let Some(timeout) = &config.rpc.timeout {
            if let Err(e) = Self::validate_duration(timeout, "rpc.timeout") {
                errors.push(e);
            }
        }

        if let Some(metadata) = &config.metadata {
            if metadata.address.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "metadata.address".to_string(),
                });
            }
        }

        for name in config.response_headers.keys() {
            if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("response_headers.{name}"),
                    message: "Not a valid HTTP header name".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// The application is a single path segment.
    fn validate_application(application: &str) -> ValidationResult<()> {
        if application.is_empty() {
            return Err(ValidationError::MissingField {
                field: "application".to_string(),
            });
        }
        let valid = APPLICATION_PATTERN
            .as_ref()
            .map(|re| re.is_match(application))
            .unwrap_or(false);
        if !valid {
            return Err(ValidationError::InvalidField {
                field: "application".to_string(),
                message: format!(
                    "'{application}' must be a single path segment of [A-Za-z0-9_.-]"
                ),
            });
        }
        Ok(())
    }

    fn validate_worker_pool(pool: &WorkerPoolConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // core_threads = 0 is the documented way to disable isolation
        if pool.core_threads == 0 {
            return errors;
        }

        if pool.max_threads < pool.core_threads {
            errors.push(ValidationError::InvalidField {
                field: "worker_pool.max_threads".to_string(),
                message: format!(
                    "Must be at least core_threads ({}), got {}",
                    pool.core_threads, pool.max_threads
                ),
            });
        }

        if let Err(e) = Self::validate_duration(&pool.keep_alive, "worker_pool.keep_alive") {
            errors.push(e);
        }

        errors
    }

    fn validate_filters(filters: &[FilterEntry]) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if filters.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "filters".to_string(),
            });
            return errors;
        }

        let mut priorities = HashSet::new();
        let mut names = HashSet::new();
        for entry in filters {
            if !priorities.insert(entry.priority) {
                errors.push(ValidationError::FilterConflict {
                    message: format!(
                        "priority {} is used by more than one filter ('{}')",
                        entry.priority, entry.name
                    ),
                });
            }
            if !names.insert(entry.name.as_str()) {
                errors.push(ValidationError::FilterConflict {
                    message: format!("filter '{}' is listed more than once", entry.name),
                });
            }
        }

        errors
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_duration(value: &str, context: &str) -> ValidationResult<()> {
        match humantime::parse_duration(value) {
            Ok(d) if d.is_zero() => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: "Duration must be greater than zero".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid duration '{value}': {e}"),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
