//! Blocking multi-producer, single-consumer queue with shutdown

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    cleared: bool,
}

/// Unbounded FIFO drained by one consumer thread
///
/// `enqueue` never blocks. [`clear`](Self::clear) shuts the queue down:
/// pending items are dropped and every current or future dequeue returns
/// `None`.
pub struct SingleConsumerQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for SingleConsumerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleConsumerQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                cleared: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item
    ///
    /// Returns `false` and drops the item once the queue is cleared.
    pub fn enqueue(&self, item: T) -> bool {
        let rejected = {
            let mut state = self.state.lock();
            if state.cleared {
                Some(item)
            } else {
                state.items.push_back(item);
                None
            }
        };
        match rejected {
            Some(item) => {
                drop(item);
                false
            }
            None => {
                self.available.notify_one();
                true
            }
        }
    }

    /// Block until an item is available or the queue is cleared
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cleared {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.cleared {
            return None;
        }
        state.items.pop_front()
    }

    /// Like [`dequeue`](Self::dequeue), giving up after `timeout`
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.cleared {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return if state.cleared {
                    None
                } else {
                    state.items.pop_front()
                };
            }
        }
    }

    /// Shut the queue down and drop pending items
    ///
    /// Items are dropped after the lock is released.
    pub fn clear(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.cleared = true;
            std::mem::take(&mut state.items)
        };
        self.available.notify_all();
        drop(pending);
    }

    pub fn is_cleared(&self) -> bool {
        self.state.lock().cleared
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
