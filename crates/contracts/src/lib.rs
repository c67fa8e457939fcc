//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the workspace.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Frame timestamps are device-clock milliseconds (`f64`)
//! - Frame counters are strictly increasing per stream within one capture session
//! - System arrival time is wall-clock milliseconds since the Unix epoch

mod archive_config;
mod continuation;
mod device_info;
mod error;
mod frame;
mod mode;
mod motion;
mod stream;
mod transport;

pub use archive_config::*;
pub use continuation::Continuation;
pub use device_info::*;
pub use error::*;
pub use frame::*;
pub use mode::*;
pub use motion::*;
pub use stream::*;
pub use transport::{DataChannelCallback, RawFrame, RawFrameCallback, UvcTransport};
