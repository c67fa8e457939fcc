//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Device profile rejected by mode selection
    #[error("Device profile cannot be streamed: {message}")]
    Unstreamable { message: String },

    /// Device or archive error
    #[error("Device error: {0}")]
    Device(#[from] contracts::ContractError),

    /// Consumer dispatch error
    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] dispatcher::DispatcherError),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn unstreamable(message: impl Into<String>) -> Self {
        Self::Unstreamable {
            message: message.into(),
        }
    }
}
