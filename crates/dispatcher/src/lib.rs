//! # Dispatcher
//!
//! Frameset distribution to application consumers.
//!
//! Responsibilities:
//! - Blocking [`SingleConsumerQueue`] with shutdown
//! - One worker thread and queue per [`FrameConsumer`]
//! - Round-robin routing that skips consumers which have exited

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod queue;

#[cfg(test)]
mod test_support;

pub use consumer::{ConsumerFlow, FnConsumer, FrameConsumer, LogConsumer};
pub use dispatcher::{DispatcherConfig, FramesetDispatcher};
pub use error::DispatcherError;
pub use handle::{ConsumerHandle, Offer};
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use queue::SingleConsumerQueue;
pub use sync_engine::FrameSet;
