//! # Transport
//!
//! In-process stand-in for the USB/UVC layer of a depth camera.
//!
//! [`MockUvcDevice`] implements [`contracts::UvcTransport`] against a
//! `DeviceInfo` capability table. Frames are delivered either manually from
//! the calling thread (deterministic tests) or paced by one thread per
//! configured sub-device (demo runs).

pub mod mock_uvc;

pub use mock_uvc::{MockTransportConfig, MockUvcDevice};
