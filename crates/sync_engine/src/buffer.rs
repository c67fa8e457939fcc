//! Per-stream pool of reference-counted frame slots.
//!
//! Slots live in a `Slab`, so a slot key stays stable for as long as any
//! reference to it is alive. The pool never grows past its capacity:
//! reservations for frames still being written count against it.

use std::fmt;

use bytes::Bytes;
use contracts::{Continuation, FrameMeta, StreamId};
use slab::Slab;

/// One committed frame
pub(crate) struct Slot {
    pub(crate) meta: FrameMeta,
    pub(crate) data: Bytes,
    refs: usize,
    /// Zero-copy frames keep the transport buffer until the last release
    continuation: Option<Continuation>,
}

/// Geometry every frame of the pool is committed with
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolLayout {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: contracts::Format,
    pub(crate) stride: usize,
    pub(crate) frame_size: usize,
    pub(crate) fps: u32,
}

/// Outcome of committing a frame into a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Accepted(usize),
    /// Frame counter not strictly greater than the last committed one
    OutOfOrder,
}

pub(crate) struct FramePool {
    stream: StreamId,
    layout: PoolLayout,
    slots: Slab<Slot>,
    capacity: usize,
    reserved: usize,
    /// Most recent committed frame; the pool holds one reference to it
    latest: Option<usize>,
    last_counter: Option<u64>,
    committed: u64,
    dropped: u64,
    out_of_order: u64,
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("stream", &self.stream)
            .field("live", &self.slots.len())
            .field("reserved", &self.reserved)
            .field("capacity", &self.capacity)
            .field("committed", &self.committed)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl FramePool {
    pub(crate) fn new(stream: StreamId, layout: PoolLayout, capacity: usize) -> Self {
        Self {
            stream,
            layout,
            slots: Slab::with_capacity(capacity),
            capacity,
            reserved: 0,
            latest: None,
            last_counter: None,
            committed: 0,
            dropped: 0,
            out_of_order: 0,
        }
    }

    #[inline]
    pub(crate) fn layout(&self) -> PoolLayout {
        self.layout
    }

    #[inline]
    pub(crate) fn has_room(&self) -> bool {
        self.slots.len() + self.reserved < self.capacity
    }

    /// Reserve room for one frame being written
    ///
    /// Returns `false` when every slot is taken.
    #[inline]
    pub(crate) fn try_reserve(&mut self) -> bool {
        if !self.has_room() {
            self.dropped += 1;
            return false;
        }
        self.reserved += 1;
        true
    }

    /// Give back a reservation that was never committed
    #[inline]
    pub(crate) fn cancel_reservation(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Turn a reservation into a committed frame
    ///
    /// The new frame becomes the pool's latest; the previous latest loses
    /// the pool's reference and may be reclaimed into `released`.
    pub(crate) fn commit(
        &mut self,
        meta: FrameMeta,
        data: Bytes,
        continuation: Option<Continuation>,
        released: &mut Vec<Continuation>,
    ) -> Admission {
        self.cancel_reservation();

        if let Some(last) = self.last_counter {
            if meta.frame_counter <= last {
                self.dropped += 1;
                self.out_of_order += 1;
                if let Some(c) = continuation {
                    released.push(c);
                }
                return Admission::OutOfOrder;
            }
        }

        let key = self.slots.insert(Slot {
            meta,
            data,
            refs: 1,
            continuation,
        });
        if let Some(previous) = self.latest.replace(key) {
            self.release(previous, released);
        }
        self.last_counter = Some(meta.frame_counter);
        self.committed += 1;
        Admission::Accepted(key)
    }

    #[inline]
    pub(crate) fn latest(&self) -> Option<(usize, &Slot)> {
        self.latest
            .and_then(|key| self.slots.get(key).map(|slot| (key, slot)))
    }

    #[inline]
    pub(crate) fn get(&self, key: usize) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Add one reference to a live slot
    #[inline]
    pub(crate) fn acquire(&mut self, key: usize) -> bool {
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference; reclaims the slot when it was the last one
    pub(crate) fn release(&mut self, key: usize, released: &mut Vec<Continuation>) {
        let Some(slot) = self.slots.get_mut(key) else {
            debug_assert!(false, "release of unknown slot {key}");
            return;
        };
        debug_assert!(slot.refs > 0);
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            let slot = self.slots.remove(key);
            if let Some(c) = slot.continuation {
                released.push(c);
            }
        }
    }

    /// Drop the pool's own reference to its latest frame
    pub(crate) fn release_latest(&mut self, released: &mut Vec<Continuation>) {
        if let Some(key) = self.latest.take() {
            self.release(key, released);
        }
    }

    #[inline]
    pub(crate) fn live_slots(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn reserved(&self) -> usize {
        self.reserved
    }

    #[inline]
    pub(crate) fn committed_count(&self) -> u64 {
        self.committed
    }

    #[inline]
    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped
    }

    #[inline]
    pub(crate) fn out_of_order_count(&self) -> u64 {
        self.out_of_order
    }

    #[inline]
    pub(crate) fn last_counter(&self) -> Option<u64> {
        self.last_counter
    }

    #[cfg(test)]
    pub(crate) fn refs(&self, key: usize) -> Option<usize> {
        self.slots.get(key).map(|s| s.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Format;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn layout() -> PoolLayout {
        PoolLayout {
            width: 4,
            height: 2,
            format: Format::Z16,
            stride: 8,
            frame_size: 16,
            fps: 30,
        }
    }

    fn meta(counter: u64) -> FrameMeta {
        FrameMeta {
            stream: StreamId::Depth,
            timestamp: counter as f64 * 33.3,
            frame_counter: counter,
            system_time: 0.0,
            width: 4,
            height: 2,
            format: Format::Z16,
            stride: 8,
        }
    }

    fn commit(pool: &mut FramePool, counter: u64, released: &mut Vec<Continuation>) -> Admission {
        assert!(pool.try_reserve());
        pool.commit(meta(counter), Bytes::from_static(&[0; 16]), None, released)
    }

    #[test]
    fn test_commit_replaces_latest() {
        let mut pool = FramePool::new(StreamId::Depth, layout(), 4);
        let mut released = Vec::new();

        let Admission::Accepted(first) = commit(&mut pool, 1, &mut released) else {
            panic!("first frame rejected");
        };
        let Admission::Accepted(second) = commit(&mut pool, 2, &mut released) else {
            panic!("second frame rejected");
        };

        assert_eq!(pool.live_slots(), 1);
        assert!(pool.get(first).is_none() || first == second);
        assert_eq!(pool.latest().unwrap().1.meta.frame_counter, 2);
        assert_eq!(pool.committed_count(), 2);
    }

    #[test]
    fn test_out_of_order_is_dropped() {
        let mut pool = FramePool::new(StreamId::Depth, layout(), 4);
        let mut released = Vec::new();

        commit(&mut pool, 5, &mut released);
        assert_eq!(commit(&mut pool, 5, &mut released), Admission::OutOfOrder);
        assert_eq!(commit(&mut pool, 3, &mut released), Admission::OutOfOrder);

        assert_eq!(pool.out_of_order_count(), 2);
        assert_eq!(pool.dropped_count(), 2);
        assert_eq!(pool.last_counter(), Some(5));
        assert_eq!(pool.reserved(), 0);
    }

    #[test]
    fn test_capacity_counts_reservations() {
        let mut pool = FramePool::new(StreamId::Depth, layout(), 2);
        assert!(pool.try_reserve());
        assert!(pool.try_reserve());
        assert!(!pool.try_reserve());
        assert_eq!(pool.dropped_count(), 1);

        pool.cancel_reservation();
        assert!(pool.try_reserve());
    }

    #[test]
    fn test_acquired_slot_survives_replacement() {
        let mut pool = FramePool::new(StreamId::Depth, layout(), 4);
        let mut released = Vec::new();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        assert!(pool.try_reserve());
        let Admission::Accepted(key) = pool.commit(
            meta(1),
            Bytes::new(),
            Some(Continuation::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })),
            &mut released,
        ) else {
            panic!("frame rejected");
        };

        assert!(pool.acquire(key));
        assert_eq!(pool.refs(key), Some(2));

        commit(&mut pool, 2, &mut released);
        assert_eq!(pool.refs(key), Some(1));
        assert!(released.is_empty());

        pool.release(key, &mut released);
        assert_eq!(released.len(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        released.drain(..).for_each(Continuation::fire);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
