//! Frameset consumers driven by a worker thread

use sync_engine::FrameSet;
use tracing::{debug, info, instrument};

use crate::error::DispatcherError;

/// Whether a consumer wants more framesets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerFlow {
    Continue,
    /// The worker stops after this frameset; the dispatcher skips it from now on
    Exit,
}

/// Receives framesets on its own worker thread
pub trait FrameConsumer: Send + 'static {
    fn name(&self) -> &str;

    /// Process one frameset; dropping it releases its frames
    fn consume(&mut self, frameset: FrameSet) -> Result<ConsumerFlow, DispatcherError>;

    /// Called once when the worker stops
    fn finish(&mut self) {}
}

impl<C: FrameConsumer + ?Sized> FrameConsumer for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn consume(&mut self, frameset: FrameSet) -> Result<ConsumerFlow, DispatcherError> {
        (**self).consume(frameset)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Logs a summary of every frameset
pub struct LogConsumer {
    name: String,
    limit: Option<u64>,
    seen: u64,
}

impl LogConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            seen: 0,
        }
    }

    /// Exit after `limit` framesets
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl FrameConsumer for LogConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        level = "debug",
        name = "log_consumer_consume",
        skip(self, frameset),
        fields(consumer = %self.name)
    )]
    fn consume(&mut self, frameset: FrameSet) -> Result<ConsumerFlow, DispatcherError> {
        self.seen += 1;
        let streams: Vec<_> = frameset.streams().map(|s| s.as_str()).collect();
        let skew = observability::frameset_skew_ms(&frameset.metas());
        info!(
            consumer = %self.name,
            key_timestamp = frameset.key_timestamp(),
            streams = ?streams,
            skew_ms = skew,
            "frameset received"
        );
        match self.limit {
            Some(limit) if self.seen >= limit => Ok(ConsumerFlow::Exit),
            _ => Ok(ConsumerFlow::Continue),
        }
    }

    fn finish(&mut self) {
        debug!(consumer = %self.name, framesets = self.seen, "log consumer finished");
    }
}

/// Consumer backed by a closure
pub struct FnConsumer<F> {
    name: String,
    f: F,
}

impl<F> FnConsumer<F>
where
    F: FnMut(FrameSet) -> Result<ConsumerFlow, DispatcherError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> FrameConsumer for FnConsumer<F>
where
    F: FnMut(FrameSet) -> Result<ConsumerFlow, DispatcherError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, frameset: FrameSet) -> Result<ConsumerFlow, DispatcherError> {
        (self.f)(frameset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::framesets;

    #[test]
    fn test_log_consumer_limit() {
        let mut consumer = LogConsumer::new("log").with_limit(2);
        let mut sets = framesets(2).into_iter();

        let first = sets.next().unwrap();
        assert_eq!(consumer.consume(first).unwrap(), ConsumerFlow::Continue);
        let second = sets.next().unwrap();
        assert_eq!(consumer.consume(second).unwrap(), ConsumerFlow::Exit);
        assert_eq!(consumer.seen(), 2);
    }

    #[test]
    fn test_boxed_fn_consumer() {
        let mut consumer: Box<dyn FrameConsumer> = Box::new(FnConsumer::new("fn", |set: FrameSet| {
            if set.is_empty() {
                Err(DispatcherError::consume("fn", "empty frameset"))
            } else {
                Ok(ConsumerFlow::Continue)
            }
        }));
        assert_eq!(consumer.name(), "fn");
        let set = framesets(1).pop().unwrap();
        assert_eq!(consumer.consume(set).unwrap(), ConsumerFlow::Continue);
    }
}
