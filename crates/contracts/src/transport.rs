//! USB/UVC transport contract

use bytes::Bytes;
use std::sync::Arc;

use crate::{ContractError, Continuation, DeviceOption, OptionRange};

/// One raw buffer delivered by the transport
///
/// `continuation` hands the buffer back to the transport once fired or dropped.
#[derive(Debug)]
pub struct RawFrame {
    pub data: Bytes,
    pub continuation: Continuation,
}

/// Invoked on the transport thread for every completed video transfer
pub type RawFrameCallback = Arc<dyn Fn(RawFrame) + Send + Sync>;

/// Invoked on the data acquisition thread with raw motion-module bytes
pub type DataChannelCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Raw USB/UVC device access
pub trait UvcTransport: Send + Sync {
    /// Configure one sub-device and install its frame callback
    fn set_subdevice_mode(
        &self,
        subdevice: usize,
        width: u32,
        height: u32,
        fourcc: u32,
        fps: u32,
        callback: RawFrameCallback,
    ) -> Result<(), ContractError>;

    /// Begin streaming on every configured sub-device
    fn start_streaming(&self, num_transfer_buffers: usize) -> Result<(), ContractError>;

    /// Stop streaming and drop installed frame callbacks
    ///
    /// Must not return while a frame callback is still running.
    fn stop_streaming(&self) -> Result<(), ContractError>;

    fn set_data_channel_handler(
        &self,
        subdevice: usize,
        handler: DataChannelCallback,
    ) -> Result<(), ContractError>;

    fn start_data_acquisition(&self) -> Result<(), ContractError>;

    fn stop_data_acquisition(&self) -> Result<(), ContractError>;

    /// Range of a UVC processing-unit control
    fn pu_control_range(
        &self,
        subdevice: usize,
        option: DeviceOption,
    ) -> Result<OptionRange, ContractError>;
}
