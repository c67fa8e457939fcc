//! Reference-counted handles handed out by the archive.
//!
//! Every handle owns references to archive slots and gives them back when it
//! is released or dropped. Pixel data is an immutable `Bytes`, so reading
//! through a handle never takes the archive lock.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use contracts::{ContractError, Continuation, Format, FrameMeta, StreamId};

use crate::engine::{fire_released, Shared};

/// Metadata and pixels of one committed frame
#[derive(Debug, Clone)]
pub struct FrameView {
    pub meta: FrameMeta,
    pub data: Bytes,
}

impl FrameView {
    #[inline]
    pub fn stream(&self) -> StreamId {
        self.meta.stream
    }

    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.meta.timestamp
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.meta.frame_counter
    }
}

/// Frame of a frameset together with the slot that backs it
#[derive(Debug, Clone)]
pub(crate) struct SetFrame {
    pub(crate) slot: usize,
    pub(crate) view: FrameView,
}

/// Handle to exactly one stream's frame
pub struct FrameRef {
    shared: Arc<Shared>,
    slot: usize,
    view: FrameView,
}

impl FrameRef {
    /// Wrap a slot whose reference has already been taken
    pub(crate) fn new(shared: Arc<Shared>, slot: usize, view: FrameView) -> Self {
        Self { shared, slot, view }
    }

    #[inline]
    pub fn stream(&self) -> StreamId {
        self.view.meta.stream
    }

    #[inline]
    pub fn meta(&self) -> &FrameMeta {
        &self.view.meta
    }

    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.view.meta.timestamp
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.view.meta.frame_counter
    }

    #[inline]
    pub fn system_time(&self) -> f64 {
        self.view.meta.system_time
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.view.meta.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.view.meta.height
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.view.meta.format
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.view.meta.stride
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.view.data
    }

    pub fn view(&self) -> &FrameView {
        &self.view
    }

    /// New handle to the same frame
    ///
    /// # Errors
    /// `ResourceExhausted` when the detached reference capacity is used up.
    pub fn try_clone(&self) -> Result<FrameRef, ContractError> {
        self.shared
            .state
            .lock()
            .acquire_ref(self.stream(), self.slot, self.shared.config.max_detached_refs)?;
        Ok(FrameRef::new(self.shared.clone(), self.slot, self.view.clone()))
    }

    /// Give the reference back
    pub fn release(self) {}
}

impl Drop for FrameRef {
    fn drop(&mut self) {
        let mut released = Vec::new();
        self.shared
            .state
            .lock()
            .release_ref(self.view.meta.stream, self.slot, &mut released);
        fire_released(released);
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("stream", &self.stream())
            .field("frame_counter", &self.frame_counter())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

/// Frames of all streams captured for one key-stream commit
pub struct FrameSet {
    shared: Arc<Shared>,
    key_timestamp: f64,
    frames: Vec<SetFrame>,
}

impl FrameSet {
    /// Wrap frames whose references have already been taken
    pub(crate) fn new(shared: Arc<Shared>, key_timestamp: f64, frames: Vec<SetFrame>) -> Self {
        Self {
            shared,
            key_timestamp,
            frames,
        }
    }

    /// Timestamp of the key-stream frame that produced this set
    #[inline]
    pub fn key_timestamp(&self) -> f64 {
        self.key_timestamp
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, stream: StreamId) -> bool {
        self.frame(stream).is_some()
    }

    pub fn frame(&self, stream: StreamId) -> Option<&FrameView> {
        self.frames
            .iter()
            .map(|f| &f.view)
            .find(|v| v.meta.stream == stream)
    }

    /// Streams present, in stream order
    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.frames.iter().map(|f| f.view.meta.stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameView> + '_ {
        self.frames.iter().map(|f| &f.view)
    }

    pub fn metas(&self) -> Vec<FrameMeta> {
        self.frames.iter().map(|f| f.view.meta).collect()
    }

    /// New handle sharing the same frames
    ///
    /// # Errors
    /// `ResourceExhausted` when the published frameset capacity is used up.
    pub fn try_clone(&self) -> Result<FrameSet, ContractError> {
        self.shared
            .state
            .lock()
            .acquire_set(&self.frames, self.shared.config.max_published_framesets)?;
        Ok(FrameSet::new(
            self.shared.clone(),
            self.key_timestamp,
            self.frames.clone(),
        ))
    }

    /// Independent handle to one stream's frame of this set
    ///
    /// # Errors
    /// - `UnsupportedStream` when the set has no frame for `stream`
    /// - `ResourceExhausted` when the detached reference capacity is used up
    pub fn detach(&self, stream: StreamId) -> Result<FrameRef, ContractError> {
        let frame = self
            .frames
            .iter()
            .find(|f| f.view.meta.stream == stream)
            .ok_or_else(|| ContractError::unsupported_stream(stream, "not present in frameset"))?;
        self.shared.state.lock().acquire_ref(
            stream,
            frame.slot,
            self.shared.config.max_detached_refs,
        )?;
        Ok(FrameRef::new(
            self.shared.clone(),
            frame.slot,
            frame.view.clone(),
        ))
    }

    /// Give the references back
    pub fn release(self) {}
}

impl Drop for FrameSet {
    fn drop(&mut self) {
        let mut released = Vec::new();
        self.shared
            .state
            .lock()
            .release_published(&self.frames, &mut released);
        fire_released(released);
    }
}

impl fmt::Debug for FrameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSet")
            .field("key_timestamp", &self.key_timestamp)
            .field("streams", &self.streams().collect::<Vec<_>>())
            .finish()
    }
}

/// Frame under construction
///
/// Owned exclusively by the producer until passed to
/// [`SynchronizingArchive::commit_frame`](crate::SynchronizingArchive::commit_frame).
/// Dropping it uncommitted returns the reservation and fires any attached
/// continuation.
pub struct BackBuffer {
    shared: Arc<Shared>,
    meta: FrameMeta,
    data: BytesMut,
    attached: Option<Bytes>,
    continuation: Option<Continuation>,
    armed: bool,
}

/// Committed content of a back buffer
pub(crate) struct BackParts {
    pub(crate) meta: FrameMeta,
    pub(crate) data: Bytes,
    pub(crate) continuation: Option<Continuation>,
}

impl BackBuffer {
    pub(crate) fn new(shared: Arc<Shared>, meta: FrameMeta, data: BytesMut) -> Self {
        Self {
            shared,
            meta,
            data,
            attached: None,
            continuation: None,
            armed: true,
        }
    }

    #[inline]
    pub fn stream(&self) -> StreamId {
        self.meta.stream
    }

    #[inline]
    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    /// Destination for unpacked pixels
    ///
    /// Empty for buffers allocated without processing.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Borrow the transport's bytes instead of copying them
    ///
    /// The continuation fires once the last reference to the committed frame
    /// is released.
    pub fn attach_continuation(&mut self, data: Bytes, continuation: Continuation) {
        self.attached = Some(data);
        self.continuation = Some(continuation);
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub(crate) fn into_parts(mut self) -> BackParts {
        self.armed = false;
        let data = match self.attached.take() {
            Some(bytes) => bytes,
            None => std::mem::take(&mut self.data).freeze(),
        };
        BackParts {
            meta: self.meta,
            data,
            continuation: self.continuation.take(),
        }
    }
}

impl Drop for BackBuffer {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .state
                .lock()
                .cancel_reservation(self.meta.stream);
        }
    }
}

impl fmt::Debug for BackBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackBuffer")
            .field("stream", &self.meta.stream)
            .field("frame_counter", &self.meta.frame_counter)
            .field("attached", &self.is_attached())
            .finish()
    }
}
