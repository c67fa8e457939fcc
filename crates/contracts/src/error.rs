//! Layered error definitions
//!
//! Categorized by source: state machine / stream mapping / resources / options / config / transport

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== State Machine Errors =====
    /// Operation not allowed in the current device state
    #[error("invalid state for {operation}: {message}")]
    InvalidState { operation: String, message: String },

    // ===== Stream Errors =====
    /// Requested stream, format or preset has no hardware mapping
    #[error("unsupported stream '{stream}': {message}")]
    UnsupportedStream { stream: String, message: String },

    // ===== Resource Errors =====
    /// No free slot or reference capacity left
    #[error("resource exhausted: {resource} (capacity {capacity})")]
    ResourceExhausted { resource: String, capacity: usize },

    /// Option range queried for an unsupported control
    #[error("option not supported: {option}")]
    OptionNotSupported { option: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors =====
    /// USB/UVC transport failure
    #[error("transport error: {message}")]
    Transport { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create invalid state error
    pub fn invalid_state(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create unsupported stream error
    pub fn unsupported_stream(stream: impl ToString, message: impl Into<String>) -> Self {
        Self::UnsupportedStream {
            stream: stream.to_string(),
            message: message.into(),
        }
    }

    /// Create resource exhausted error
    pub fn resource_exhausted(resource: impl Into<String>, capacity: usize) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            capacity,
        }
    }

    /// Create option not supported error
    pub fn option_not_supported(option: impl ToString) -> Self {
        Self::OptionNotSupported {
            option: option.to_string(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ContractError::invalid_state("enable_stream", "device is capturing");
        assert_eq!(
            err.to_string(),
            "invalid state for enable_stream: device is capturing"
        );

        let err = ContractError::resource_exhausted("published framesets", 64);
        assert!(err.to_string().contains("capacity 64"));
    }
}
