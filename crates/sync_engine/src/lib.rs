//! # Sync Engine
//!
//! Synchronizing frame archive.
//!
//! Responsibilities:
//! - Per-stream bounded pools of reference-counted frame slots
//! - Frameset assembly on key-stream commits, within a sync tolerance
//! - Blocking / polling waits with a bounded frameset history
//! - Zero-copy hand-off of transport buffers through continuations
//!
//! ## Example
//!
//! ```ignore
//! use sync_engine::SynchronizingArchive;
//!
//! let archive = SynchronizingArchive::new(&selections, StreamId::Color, ArchiveConfig::default());
//!
//! // Producer (transport thread)
//! let mut frame = archive.alloc_frame(StreamId::Color, info, true)?;
//! unpack(frame.data_mut(), raw);
//! archive.commit_frame(frame)?;
//!
//! // Consumer
//! if let Some(frameset) = archive.wait_for_frames_safe(None)? {
//!     let color = frameset.frame(StreamId::Color);
//! }
//! ```

mod buffer;
mod engine;
mod handle;
mod window;

pub use contracts::{ArchiveConfig, SyncTolerance};
pub use engine::{ArchiveStats, StreamStats, SynchronizingArchive};
pub use handle::{BackBuffer, FrameRef, FrameSet, FrameView};
pub use window::SyncWindow;
