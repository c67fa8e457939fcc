//! ConsumerHandle - one consumer with its own queue and worker thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sync_engine::FrameSet;
use tracing::{debug, error, instrument, warn};

use crate::consumer::{ConsumerFlow, FrameConsumer};
use crate::error::DispatcherError;
use crate::metrics::ConsumerMetrics;
use crate::queue::SingleConsumerQueue;

/// Result of offering a frameset to a consumer
#[derive(Debug)]
pub enum Offer {
    Accepted,
    /// Queue at capacity, the frameset was released
    Dropped,
    /// Worker has exited; the frameset is handed back
    Exited(FrameSet),
}

/// Handle to a running consumer worker
pub struct ConsumerHandle {
    name: String,
    queue: Arc<SingleConsumerQueue<FrameSet>>,
    capacity: Option<usize>,
    running: Arc<AtomicBool>,
    metrics: Arc<ConsumerMetrics>,
    worker: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Start a worker thread draining a fresh queue into `consumer`
    ///
    /// With `capacity`, framesets offered while that many are pending are dropped.
    pub fn spawn<C: FrameConsumer>(
        consumer: C,
        capacity: Option<usize>,
    ) -> Result<Self, DispatcherError> {
        let name = consumer.name().to_string();
        let queue = Arc::new(SingleConsumerQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(ConsumerMetrics::new());

        let worker = {
            let queue = queue.clone();
            let running = running.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name(format!("consumer-{name}"))
                .spawn(move || consumer_worker(consumer, queue, running, metrics))
                .map_err(|source| DispatcherError::ConsumerSpawn {
                    name: name.clone(),
                    source,
                })?
        };

        Ok(Self {
            name,
            queue,
            capacity,
            running,
            metrics,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a frameset without blocking
    pub fn offer(&self, frameset: FrameSet) -> Offer {
        if !self.is_running() {
            return Offer::Exited(frameset);
        }
        if let Some(capacity) = self.capacity {
            if self.queue.len() >= capacity {
                self.metrics.inc_dropped();
                warn!(
                    consumer = %self.name,
                    key_timestamp = frameset.key_timestamp(),
                    "queue full, frameset dropped"
                );
                return Offer::Dropped;
            }
        }
        if !self.queue.enqueue(frameset) {
            // Cleared between the running check and the enqueue
            self.metrics.inc_dropped();
            return Offer::Dropped;
        }
        self.metrics.set_queue_len(self.queue.len());
        Offer::Accepted
    }

    /// Clear the queue and join the worker
    ///
    /// Pending framesets are released without being consumed.
    #[instrument(name = "consumer_handle_shutdown", skip(self), fields(consumer = %self.name))]
    pub fn shutdown(mut self) {
        self.stop();
        debug!(consumer = %self.name, "consumer handle shutdown complete");
    }

    fn stop(&mut self) {
        self.queue.clear();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(consumer = %self.name, "consumer worker panicked");
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consumer_worker<C: FrameConsumer>(
    mut consumer: C,
    queue: Arc<SingleConsumerQueue<FrameSet>>,
    running: Arc<AtomicBool>,
    metrics: Arc<ConsumerMetrics>,
) {
    let name = consumer.name().to_string();
    debug!(consumer = %name, "consumer worker started");

    while let Some(frameset) = queue.dequeue() {
        metrics.set_queue_len(queue.len());
        let key_timestamp = frameset.key_timestamp();

        match consumer.consume(frameset) {
            Ok(flow) => {
                metrics.inc_delivered();
                observability::record_frameset_dispatched(&name, true);
                if flow == ConsumerFlow::Exit {
                    debug!(consumer = %name, "consumer requested exit");
                    break;
                }
            }
            Err(e) => {
                metrics.inc_failed();
                observability::record_frameset_dispatched(&name, false);
                error!(consumer = %name, key_timestamp, error = %e, "consume failed");
            }
        }
    }

    running.store(false, Ordering::Release);
    queue.clear();
    metrics.set_queue_len(0);
    consumer.finish();
    debug!(consumer = %name, "consumer worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::FnConsumer;
    use crate::test_support::framesets;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_handle_delivers_all() {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let handle = ConsumerHandle::spawn(
            FnConsumer::new("counter", move |_set: FrameSet| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(ConsumerFlow::Continue)
            }),
            None,
        )
        .unwrap();

        for set in framesets(5) {
            assert!(matches!(handle.offer(set), Offer::Accepted));
        }
        wait_until(|| handle.metrics().delivered() == 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
        handle.shutdown();
    }

    #[test]
    fn test_full_queue_drops() {
        let handle = ConsumerHandle::spawn(
            FnConsumer::new("slow", |_set: FrameSet| {
                thread::sleep(Duration::from_millis(50));
                Ok(ConsumerFlow::Continue)
            }),
            Some(1),
        )
        .unwrap();

        for set in framesets(6) {
            handle.offer(set);
        }
        assert!(handle.metrics().dropped() > 0);
        handle.shutdown();
    }

    #[test]
    fn test_failures_are_isolated() {
        let handle = ConsumerHandle::spawn(
            FnConsumer::new("failing", |_set: FrameSet| {
                Err(DispatcherError::consume("failing", "mock failure"))
            }),
            None,
        )
        .unwrap();

        for set in framesets(3) {
            handle.offer(set);
        }
        wait_until(|| handle.metrics().failed() == 3);
        assert!(handle.is_running());
        handle.shutdown();
    }

    #[test]
    fn test_exited_consumer_returns_frameset() {
        let handle = ConsumerHandle::spawn(
            FnConsumer::new("once", |_set: FrameSet| Ok(ConsumerFlow::Exit)),
            None,
        )
        .unwrap();

        let mut sets = framesets(2).into_iter();
        handle.offer(sets.next().unwrap());
        wait_until(|| !handle.is_running());

        assert!(matches!(handle.offer(sets.next().unwrap()), Offer::Exited(_)));
        handle.shutdown();
    }
}
