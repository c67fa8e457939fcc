//! # Device
//!
//! Depth camera streaming controller.
//!
//! Responsibilities:
//! - Hold per-stream requests, callbacks and the capability table
//! - Select one hardware mode per sub-device for the enabled requests
//! - Bind transport callbacks that validate, stamp, unpack and commit frames
//!   into a [`SynchronizingArchive`](sync_engine::SynchronizingArchive)
//! - Forward the archive's waiting API and parse motion-module data
//!
//! ## Usage Example
//!
//! ```ignore
//! use device::Device;
//! use contracts::{Format, Source, StreamId};
//!
//! let device = Device::new(transport, info);
//! device.enable_stream(StreamId::Depth, 640, 480, Format::Z16, 30)?;
//! device.enable_stream(StreamId::Color, 640, 480, Format::Rgb8, 30)?;
//! device.start(Source::Video)?;
//!
//! while let Some(frames) = device.wait_for_frames_safe(None)? {
//!     let depth = frames.frame(StreamId::Depth);
//! }
//! device.stop(Source::Video)?;
//! ```

mod config;
mod controller;
mod motion;
mod selector;
mod streams;
mod timestamp;
mod unpack;

pub use config::{
    DeviceMetrics, DeviceMetricsSnapshot, FrameCallback, RequestOrigin, StreamConfig,
};
pub use controller::{Device, DeviceState};
pub use motion::{MotionEventBatch, MotionParser, PacketMotionParser};
pub use selector::{select_key_stream, select_modes};
pub use streams::{StreamKind, StreamMode, StreamRegistry};
pub use timestamp::{
    create_timestamp_reader, FrameTimestampReader, MetadataTimestampReader, SerialTimestampReader,
};
pub use unpack::unpack;

/// Device result alias
pub type Result<T> = std::result::Result<T, contracts::ContractError>;
