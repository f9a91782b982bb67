//! Error types for the throttle filter.

use thiserror::Error;

use crate::identity::IdentityMode;

/// Status code conventionally used for "Too Many Requests".
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Status code used for everything that is not the caller's fault.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Main error type for throttle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors, raised at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured identity attribute was absent on a request
    #[error("Invalid throttle configuration: no {mode} identity on request")]
    MissingIdentity {
        /// The mode that failed to produce a key
        mode: IdentityMode,
    },

    /// The bucket for the request key had no tokens left
    #[error("{message}")]
    RateExceeded {
        /// Rendered message template
        message: String,
        /// The resolved fill rate for the key
        rate: f64,
    },

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Numeric status a host pipeline should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ThrottleError::RateExceeded { .. } => STATUS_TOO_MANY_REQUESTS,
            _ => STATUS_INTERNAL_ERROR,
        }
    }
}

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
