//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Worker thread could not be started
    #[error("failed to spawn consumer '{name}': {source}")]
    ConsumerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Every consumer has exited
    #[error("no running consumer")]
    NoConsumers,

    /// A consumer failed to process a frameset
    #[error("consumer '{consumer}' failed: {message}")]
    Consume { consumer: String, message: String },

    /// Frame handle error
    #[error("frame error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    pub fn consume(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            consumer: consumer.into(),
            message: message.into(),
        }
    }
}
