//! Round-robin distribution of framesets over consumer workers

use std::sync::atomic::{AtomicUsize, Ordering};

use sync_engine::FrameSet;
use tracing::{debug, info, instrument, trace};

use crate::consumer::FrameConsumer;
use crate::error::DispatcherError;
use crate::handle::{ConsumerHandle, Offer};
use crate::metrics::MetricsSnapshot;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// Pending framesets per consumer before new ones are dropped
    pub queue_capacity: Option<usize>,
}

/// Hands each frameset to exactly one consumer
///
/// Consumer `counter % N` receives the next frameset; consumers that have
/// exited are skipped.
pub struct FramesetDispatcher {
    handles: Vec<ConsumerHandle>,
    next: AtomicUsize,
}

impl FramesetDispatcher {
    /// Dispatcher over already running handles
    pub fn with_handles(handles: Vec<ConsumerHandle>) -> Self {
        Self {
            handles,
            next: AtomicUsize::new(0),
        }
    }

    /// Spawn one worker per consumer
    #[instrument(name = "dispatcher_spawn", skip(consumers), fields(consumers = consumers.len()))]
    pub fn spawn<C: FrameConsumer>(
        consumers: Vec<C>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatcherError> {
        let handles = consumers
            .into_iter()
            .map(|c| ConsumerHandle::spawn(c, config.queue_capacity))
            .collect::<Result<Vec<_>, _>>()?;
        info!(consumers = handles.len(), "dispatcher started");
        Ok(Self::with_handles(handles))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Consumers whose worker is still running
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| h.is_running()).count()
    }

    /// Route `frameset` to the next running consumer
    ///
    /// Returns the index of the consumer it was offered to. A full queue
    /// drops the frameset and still counts as routed.
    ///
    /// # Errors
    /// `NoConsumers` once every consumer has exited; the frameset is released.
    pub fn dispatch(&self, frameset: FrameSet) -> Result<usize, DispatcherError> {
        let n = self.handles.len();
        if n == 0 {
            return Err(DispatcherError::NoConsumers);
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut frameset = frameset;
        for offset in 0..n {
            let index = (start + offset) % n;
            match self.handles[index].offer(frameset) {
                Offer::Accepted | Offer::Dropped => {
                    trace!(consumer = index, "frameset dispatched");
                    return Ok(index);
                }
                Offer::Exited(returned) => frameset = returned,
            }
        }
        debug!("every consumer has exited");
        Err(DispatcherError::NoConsumers)
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Clear every queue and join every worker
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown();
        }
        info!("dispatcher shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerFlow, FnConsumer, LogConsumer};
    use crate::test_support::framesets;
    use std::thread;
    use std::time::Duration;

    type Callback = Box<dyn FnMut(FrameSet) -> Result<ConsumerFlow, DispatcherError> + Send>;

    fn consumer(name: &str, flow: ConsumerFlow) -> FnConsumer<Callback> {
        let callback: Callback = Box::new(move |_set| Ok(flow));
        FnConsumer::new(name, callback)
    }

    fn settle(dispatcher: &FramesetDispatcher, total: u64) {
        for _ in 0..200 {
            let delivered: u64 = dispatcher.metrics().iter().map(|(_, m)| m.delivered).sum();
            if delivered == total {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_round_robin_spreads_evenly() {
        let consumers = vec![
            consumer("a", ConsumerFlow::Continue),
            consumer("b", ConsumerFlow::Continue),
            consumer("c", ConsumerFlow::Continue),
        ];
        let dispatcher = FramesetDispatcher::spawn(consumers, DispatcherConfig::default()).unwrap();

        let targets: Vec<usize> = framesets(9)
            .into_iter()
            .map(|set| dispatcher.dispatch(set).unwrap())
            .collect();
        assert_eq!(targets, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);

        settle(&dispatcher, 9);
        for (_, snapshot) in dispatcher.metrics() {
            assert_eq!(snapshot.delivered, 3);
        }
        dispatcher.shutdown();
    }

    #[test]
    fn test_exited_consumers_are_skipped() {
        let consumers = vec![
            consumer("once", ConsumerFlow::Exit),
            consumer("steady", ConsumerFlow::Continue),
        ];
        let dispatcher = FramesetDispatcher::spawn(consumers, DispatcherConfig::default()).unwrap();
        let mut sets = framesets(4).into_iter();

        assert_eq!(dispatcher.dispatch(sets.next().unwrap()).unwrap(), 0);
        for _ in 0..200 {
            if dispatcher.running() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(dispatcher.running(), 1);

        for set in sets {
            assert_eq!(dispatcher.dispatch(set).unwrap(), 1);
        }
        dispatcher.shutdown();
    }

    #[test]
    fn test_no_consumers_left() {
        let dispatcher = FramesetDispatcher::spawn(
            vec![LogConsumer::new("log").with_limit(1)],
            DispatcherConfig::default(),
        )
        .unwrap();
        let mut sets = framesets(2).into_iter();

        dispatcher.dispatch(sets.next().unwrap()).unwrap();
        for _ in 0..200 {
            if dispatcher.running() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            dispatcher.dispatch(sets.next().unwrap()),
            Err(DispatcherError::NoConsumers)
        ));
        dispatcher.shutdown();
    }

    #[test]
    fn test_empty_dispatcher() {
        let dispatcher = FramesetDispatcher::with_handles(Vec::new());
        assert!(dispatcher.is_empty());
        let set = framesets(1).pop().unwrap();
        assert!(matches!(dispatcher.dispatch(set), Err(DispatcherError::NoConsumers)));
    }
}
