//! Synchronizing frame archive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use contracts::{
    ArchiveConfig, ContractError, Continuation, FrameInfo, FrameMeta, ModeSelection, StreamId,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::{traits::*, HeapRb};
use tracing::{debug, instrument, trace, warn};

use crate::buffer::{Admission, FramePool, PoolLayout};
use crate::handle::{BackBuffer, FrameRef, FrameSet, FrameView, SetFrame};
use crate::window::SyncWindow;

/// Frameset waiting in the history or held as the front set
struct PendingSet {
    key_timestamp: f64,
    frames: Vec<SetFrame>,
}

pub(crate) struct State {
    /// Indexed by `StreamId::index`
    pools: Vec<Option<FramePool>>,
    key_stream: StreamId,
    window: SyncWindow,
    history: HeapRb<PendingSet>,
    front: Option<PendingSet>,
    published: usize,
    detached: usize,
    flushed: bool,
    framesets_published: u64,
}

impl State {
    #[inline]
    fn pool(&self, stream: StreamId) -> Option<&FramePool> {
        self.pools.get(stream.index()).and_then(Option::as_ref)
    }

    #[inline]
    fn pool_mut(&mut self, stream: StreamId) -> Option<&mut FramePool> {
        self.pools.get_mut(stream.index()).and_then(Option::as_mut)
    }

    fn release_frames(&mut self, frames: &[SetFrame], released: &mut Vec<Continuation>) {
        for frame in frames {
            if let Some(pool) = self.pool_mut(frame.view.meta.stream) {
                pool.release(frame.slot, released);
            }
        }
    }

    /// Evict pending framesets, oldest first, until `stream` has a free slot
    fn make_room(&mut self, stream: StreamId, released: &mut Vec<Continuation>) -> usize {
        let mut evicted = 0;
        while !self.pool(stream).map_or(true, FramePool::has_room) {
            let Some(set) = self.history.try_pop() else {
                break;
            };
            self.release_frames(&set.frames, released);
            evicted += 1;
        }
        evicted
    }

    /// Take one more published-frameset reference on every frame
    pub(crate) fn acquire_set(
        &mut self,
        frames: &[SetFrame],
        capacity: usize,
    ) -> Result<(), ContractError> {
        if self.published >= capacity {
            return Err(ContractError::resource_exhausted(
                "published framesets",
                capacity,
            ));
        }
        for frame in frames {
            if let Some(pool) = self.pool_mut(frame.view.meta.stream) {
                pool.acquire(frame.slot);
            }
        }
        self.published += 1;
        Ok(())
    }

    pub(crate) fn release_published(
        &mut self,
        frames: &[SetFrame],
        released: &mut Vec<Continuation>,
    ) {
        self.release_frames(frames, released);
        self.published = self.published.saturating_sub(1);
    }

    /// Take one detached reference on a slot
    pub(crate) fn acquire_ref(
        &mut self,
        stream: StreamId,
        slot: usize,
        capacity: usize,
    ) -> Result<(), ContractError> {
        if self.detached >= capacity {
            return Err(ContractError::resource_exhausted("detached frame refs", capacity));
        }
        let acquired = self
            .pool_mut(stream)
            .map(|pool| pool.acquire(slot))
            .unwrap_or(false);
        if !acquired {
            return Err(ContractError::unsupported_stream(stream, "frame no longer available"));
        }
        self.detached += 1;
        Ok(())
    }

    pub(crate) fn release_ref(
        &mut self,
        stream: StreamId,
        slot: usize,
        released: &mut Vec<Continuation>,
    ) {
        if let Some(pool) = self.pool_mut(stream) {
            pool.release(slot, released);
        }
        self.detached = self.detached.saturating_sub(1);
    }

    pub(crate) fn cancel_reservation(&mut self, stream: StreamId) {
        if let Some(pool) = self.pool_mut(stream) {
            pool.cancel_reservation();
        }
    }

    /// Snapshot the latest frame of every stream within the sync window
    fn assemble(&mut self, key_timestamp: f64) -> PendingSet {
        let window = self.window;
        let mut frames = Vec::new();
        for pool in self.pools.iter_mut().flatten() {
            let candidate = pool.latest().and_then(|(slot, s)| {
                window.admits(key_timestamp, s.meta.timestamp).then(|| SetFrame {
                    slot,
                    view: FrameView {
                        meta: s.meta,
                        data: s.data.clone(),
                    },
                })
            });
            if let Some(frame) = candidate {
                pool.acquire(frame.slot);
                frames.push(frame);
            }
        }
        PendingSet {
            key_timestamp,
            frames,
        }
    }

    fn publish(&mut self, set: PendingSet, released: &mut Vec<Continuation>) {
        let metas: Vec<FrameMeta> = set.frames.iter().map(|f| f.view.meta).collect();
        if let Some(evicted) = self.history.push_overwrite(set) {
            trace!(
                key_timestamp = evicted.key_timestamp,
                "history full, oldest frameset evicted"
            );
            self.release_frames(&evicted.frames, released);
        }
        self.framesets_published += 1;
        observability::record_frameset_published(observability::frameset_skew_ms(&metas));
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    frames_ready: Condvar,
    pub(crate) config: ArchiveConfig,
}

/// Fire continuations collected under the lock
pub(crate) fn fire_released(released: Vec<Continuation>) {
    for continuation in released {
        continuation.fire();
        observability::record_continuation_fired();
    }
}

/// Per-stream archive counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub stream: StreamId,
    pub committed: u64,
    pub dropped: u64,
    pub out_of_order: u64,
    pub live_slots: usize,
    pub reserved: usize,
    pub last_counter: Option<u64>,
}

/// Snapshot of archive occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub key_stream: StreamId,
    pub streams: Vec<StreamStats>,
    /// Framesets waiting in the history
    pub pending_framesets: usize,
    /// Frameset handles held outside the archive
    pub published_framesets: usize,
    /// Frame handles held outside the archive
    pub detached_refs: usize,
    /// Framesets assembled since construction
    pub framesets_published: u64,
    pub flushed: bool,
}

impl ArchiveStats {
    pub fn stream(&self, stream: StreamId) -> Option<&StreamStats> {
        self.streams.iter().find(|s| s.stream == stream)
    }
}

/// Buffers, synchronizes and reference-counts frames of every active stream
///
/// Cheap to clone; clones share the same archive.
#[derive(Clone)]
pub struct SynchronizingArchive {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SynchronizingArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizingArchive")
            .field("key_stream", &self.key_stream())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl SynchronizingArchive {
    /// Create an archive holding one pool per output of `selections`
    pub fn new(selections: &[ModeSelection], key_stream: StreamId, config: ArchiveConfig) -> Self {
        let mut pools: Vec<Option<FramePool>> = (0..StreamId::COUNT).map(|_| None).collect();
        let mut key_fps = 0;

        for selection in selections {
            for output in &selection.outputs {
                let slot = &mut pools[output.stream.index()];
                if slot.is_some() {
                    warn!(stream = %output.stream, "stream served by more than one mode, keeping the first");
                    continue;
                }
                let layout = PoolLayout {
                    width: selection.width(),
                    height: selection.height(),
                    format: output.format,
                    stride: selection.output_stride(output.stream),
                    frame_size: selection.output_frame_size(output.stream),
                    fps: selection.fps(),
                };
                if output.stream == key_stream {
                    key_fps = layout.fps;
                }
                *slot = Some(FramePool::new(
                    output.stream,
                    layout,
                    config.slots_per_stream.max(1),
                ));
            }
        }

        let window = SyncWindow::new(config.tolerance, key_fps);
        debug!(
            key_stream = %key_stream,
            window_ms = ?window.window_ms(),
            streams = pools.iter().flatten().count(),
            "archive created"
        );

        let state = State {
            pools,
            key_stream,
            window,
            history: HeapRb::new(config.history_depth.max(1)),
            front: None,
            published: 0,
            detached: 0,
            flushed: false,
            framesets_published: 0,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                frames_ready: Condvar::new(),
                config,
            }),
        }
    }

    pub fn key_stream(&self) -> StreamId {
        self.shared.state.lock().key_stream
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.shared.config
    }

    /// Streams with a pool, in stream order
    pub fn streams(&self) -> Vec<StreamId> {
        let state = self.shared.state.lock();
        StreamId::ALL
            .into_iter()
            .filter(|s| state.pool(*s).is_some())
            .collect()
    }

    pub fn is_flushed(&self) -> bool {
        self.shared.state.lock().flushed
    }

    /// Reserve a slot for the next frame of `stream`
    ///
    /// Never waits. With `requires_processing` the buffer carries a zeroed
    /// destination of the output size; otherwise the producer is expected to
    /// attach the transport bytes.
    ///
    /// # Errors
    /// - `UnsupportedStream` when the stream has no pool
    /// - `InvalidState` after [`flush`](Self::flush)
    /// - `ResourceExhausted` when every slot of the pool is taken by frames
    ///   held outside the archive
    pub fn alloc_frame(
        &self,
        stream: StreamId,
        info: FrameInfo,
        requires_processing: bool,
    ) -> Result<BackBuffer, ContractError> {
        let capacity = self.shared.config.slots_per_stream;
        let mut released = Vec::new();
        let reserved = {
            let mut state = self.shared.state.lock();
            if state.flushed {
                return Err(ContractError::invalid_state("alloc_frame", "archive is flushed"));
            }
            // Slots pinned by pending framesets go before the new frame is dropped
            let evicted = state.make_room(stream, &mut released);
            if evicted > 0 {
                debug!(%stream, evicted, "frame pool full, oldest pending framesets evicted");
            }
            match state.pool_mut(stream) {
                Some(pool) => {
                    if pool.try_reserve() {
                        Ok(pool.layout())
                    } else {
                        observability::record_frame_dropped(stream, "pool_exhausted");
                        Err(ContractError::resource_exhausted(
                            format!("{stream} frame slots"),
                            capacity,
                        ))
                    }
                }
                None => Err(ContractError::unsupported_stream(stream, "stream is not active")),
            }
        };
        fire_released(released);
        let layout = reserved?;

        let meta = FrameMeta {
            stream,
            timestamp: info.timestamp,
            frame_counter: info.frame_counter,
            system_time: info.system_time,
            width: layout.width,
            height: layout.height,
            format: layout.format,
            stride: layout.stride,
        };
        let data = if requires_processing {
            BytesMut::zeroed(layout.frame_size)
        } else {
            BytesMut::new()
        };
        Ok(BackBuffer::new(self.shared.clone(), meta, data))
    }

    /// Publish a written frame
    ///
    /// Returns `false` when the frame was dropped because its counter does not
    /// advance the stream. A key-stream commit assembles a frameset from the
    /// latest frame of every stream and wakes waiters.
    ///
    /// # Errors
    /// `InvalidState` after [`flush`](Self::flush).
    #[instrument(
        level = "trace",
        name = "archive_commit_frame",
        skip(self, buffer),
        fields(stream = %buffer.stream(), frame_counter = buffer.meta().frame_counter)
    )]
    pub fn commit_frame(&self, buffer: BackBuffer) -> Result<bool, ContractError> {
        let parts = buffer.into_parts();
        let stream = parts.meta.stream;
        let mut released = Vec::new();

        let result = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.flushed {
                state.cancel_reservation(stream);
                released.extend(parts.continuation);
                observability::record_frame_dropped(stream, "flushed");
                Err(ContractError::invalid_state("commit_frame", "archive is flushed"))
            } else {
                let admission = match state.pool_mut(stream) {
                    Some(pool) => {
                        pool.commit(parts.meta, parts.data, parts.continuation, &mut released)
                    }
                    None => {
                        released.extend(parts.continuation);
                        Admission::OutOfOrder
                    }
                };
                match admission {
                    Admission::Accepted(_) => {
                        observability::record_frame_committed(stream);
                        if let Some(pool) = state.pool(stream) {
                            observability::record_pool_occupancy(stream, pool.live_slots());
                        }
                        if stream == state.key_stream {
                            let set = state.assemble(parts.meta.timestamp);
                            state.publish(set, &mut released);
                            self.shared.frames_ready.notify_all();
                        }
                        Ok(true)
                    }
                    Admission::OutOfOrder => {
                        debug!(
                            stream = %stream,
                            frame_counter = parts.meta.frame_counter,
                            "frame counter did not advance, dropping frame"
                        );
                        observability::record_frame_dropped(stream, "out_of_order");
                        Ok(false)
                    }
                }
            }
        };

        fire_released(released);
        result
    }

    /// Handle to the latest committed frame of `stream`, without waiting
    pub fn track_frame(&self, stream: StreamId) -> Option<FrameRef> {
        let mut state = self.shared.state.lock();
        let (slot, view) = state.pool(stream)?.latest().map(|(slot, s)| {
            (
                slot,
                FrameView {
                    meta: s.meta,
                    data: s.data.clone(),
                },
            )
        })?;
        match state.acquire_ref(stream, slot, self.shared.config.max_detached_refs) {
            Ok(()) => Some(FrameRef::new(self.shared.clone(), slot, view)),
            Err(e) => {
                warn!(stream = %stream, error = %e, "cannot track frame");
                None
            }
        }
    }

    /// Block until a frameset is pending, the archive is flushed or the timeout expires
    fn wait_pending(&self, state: &mut MutexGuard<'_, State>, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if !state.history.is_empty() {
                return true;
            }
            if state.flushed {
                return false;
            }
            match deadline {
                None => self.shared.frames_ready.wait(state),
                Some(deadline) => {
                    if self.shared.frames_ready.wait_until(state, deadline).timed_out() {
                        return !state.history.is_empty();
                    }
                }
            }
        }
    }

    fn advance_front(&self, timeout: Option<Duration>, block: bool) -> bool {
        let mut released = Vec::new();
        let advanced = {
            let mut state = self.shared.state.lock();
            let ready = if block {
                self.wait_pending(&mut state, timeout)
            } else {
                !state.history.is_empty()
            };
            match ready.then(|| state.history.try_pop()).flatten() {
                Some(set) => {
                    if let Some(old) = state.front.replace(set) {
                        state.release_frames(&old.frames, &mut released);
                    }
                    true
                }
                None => false,
            }
        };
        fire_released(released);
        advanced
    }

    /// Advance the front frameset, blocking up to `timeout` (`None` waits until flush)
    ///
    /// Returns `false` on timeout or after flush.
    #[instrument(level = "trace", name = "archive_wait_for_frames", skip(self))]
    pub fn wait_for_frames(&self, timeout: Option<Duration>) -> bool {
        self.advance_front(timeout, true)
    }

    /// Advance the front frameset if one is pending
    pub fn poll_for_frames(&self) -> bool {
        self.advance_front(None, false)
    }

    /// Frame of `stream` in the front frameset
    ///
    /// Valid until the next `wait_for_frames` / `poll_for_frames`.
    pub fn front_frame(&self, stream: StreamId) -> Option<FrameView> {
        self.shared
            .state
            .lock()
            .front
            .as_ref()
            .and_then(|set| set.frames.iter().find(|f| f.view.meta.stream == stream))
            .map(|f| f.view.clone())
    }

    fn take_published(
        &self,
        timeout: Option<Duration>,
        block: bool,
    ) -> Result<Option<FrameSet>, ContractError> {
        let capacity = self.shared.config.max_published_framesets;
        let mut state = self.shared.state.lock();
        let ready = if block {
            self.wait_pending(&mut state, timeout)
        } else {
            !state.history.is_empty()
        };
        if !ready {
            return Ok(None);
        }
        if state.published >= capacity {
            return Err(ContractError::resource_exhausted("published framesets", capacity));
        }
        Ok(state.history.try_pop().map(|set| {
            // History references move to the handle
            state.published += 1;
            FrameSet::new(self.shared.clone(), set.key_timestamp, set.frames)
        }))
    }

    /// Take ownership of the next frameset, blocking up to `timeout`
    ///
    /// Returns `Ok(None)` on timeout or after flush.
    ///
    /// # Errors
    /// `ResourceExhausted` when the published frameset capacity is used up.
    #[instrument(level = "trace", name = "archive_wait_for_frames_safe", skip(self))]
    pub fn wait_for_frames_safe(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<FrameSet>, ContractError> {
        self.take_published(timeout, true)
    }

    /// Take ownership of the next frameset if one is pending
    pub fn poll_for_frames_safe(&self) -> Result<Option<FrameSet>, ContractError> {
        self.take_published(None, false)
    }

    pub fn clone_frameset(&self, frameset: &FrameSet) -> Result<FrameSet, ContractError> {
        frameset.try_clone()
    }

    pub fn detach_frame_ref(
        &self,
        frameset: &FrameSet,
        stream: StreamId,
    ) -> Result<FrameRef, ContractError> {
        frameset.detach(stream)
    }

    pub fn clone_frame(&self, frame: &FrameRef) -> Result<FrameRef, ContractError> {
        frame.try_clone()
    }

    pub fn release_frameset(&self, frameset: FrameSet) {
        frameset.release();
    }

    pub fn release_frame_ref(&self, frame: FrameRef) {
        frame.release();
    }

    /// Terminate the archive
    ///
    /// Wakes every waiter with an empty result and drops every reference the
    /// archive holds itself. Handles held by callers stay valid until released.
    #[instrument(name = "archive_flush", skip(self))]
    pub fn flush(&self) {
        let mut released = Vec::new();
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.flushed = true;

            let mut discarded = 0usize;
            while let Some(set) = state.history.try_pop() {
                state.release_frames(&set.frames, &mut released);
                discarded += 1;
            }
            if let Some(front) = state.front.take() {
                state.release_frames(&front.frames, &mut released);
            }
            for pool in state.pools.iter_mut().flatten() {
                pool.release_latest(&mut released);
            }
            debug!(
                discarded_framesets = discarded,
                released_buffers = released.len(),
                "archive flushed"
            );
        }
        self.shared.frames_ready.notify_all();
        fire_released(released);
    }

    pub fn stats(&self) -> ArchiveStats {
        let state = self.shared.state.lock();
        ArchiveStats {
            key_stream: state.key_stream,
            streams: StreamId::ALL
                .iter()
                .filter_map(|s| state.pool(*s).map(|p| (*s, p)))
                .map(|(stream, p)| StreamStats {
                    stream,
                    committed: p.committed_count(),
                    dropped: p.dropped_count(),
                    out_of_order: p.out_of_order_count(),
                    live_slots: p.live_slots(),
                    reserved: p.reserved(),
                    last_counter: p.last_counter(),
                })
                .collect(),
            pending_framesets: state.history.occupied_len(),
            published_framesets: state.published,
            detached_refs: state.detached,
            framesets_published: state.framesets_published,
            flushed: state.flushed,
        }
    }
}
