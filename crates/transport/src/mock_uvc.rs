//! Mock UVC device
//!
//! Implements `UvcTransport` on top of a capability table. Frames carry the
//! metadata trailer expected by the metadata timestamp reader. Supports
//! failure injection, corrupt-frame injection, manual delivery from the
//! calling thread and paced delivery from one thread per sub-device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use contracts::{
    ContractError, Continuation, DataChannelCallback, DeviceInfo, DeviceOption, EventSource,
    FrameTrailer, MotionPacket, OptionRange, RawFrame, RawFrameCallback, UvcTransport,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, trace, warn};

/// Mock transport configuration
#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    /// Deliver frames from background threads at each mode's fps
    pub paced: bool,
    /// Every n-th frame of a sub-device has its trailer corrupted
    pub corrupt_every: Option<u64>,
    /// IMU sample rate of the paced motion thread, 0 disables it
    pub motion_rate_hz: f64,
    /// Sub-devices whose `set_subdevice_mode` should fail
    pub fail_set_mode: Vec<usize>,
    /// Make `start_streaming` fail
    pub fail_start: bool,
    /// Ranges reported for processing-unit controls
    pub pu_ranges: Vec<(DeviceOption, OptionRange)>,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        let range = |min: f64, max: f64, default: f64| OptionRange {
            min,
            max,
            step: 1.0,
            default,
        };
        Self {
            paced: false,
            corrupt_every: None,
            motion_rate_hz: 0.0,
            fail_set_mode: Vec::new(),
            fail_start: false,
            pu_ranges: vec![
                (DeviceOption::ColorBrightness, range(-64.0, 64.0, 0.0)),
                (DeviceOption::ColorContrast, range(0.0, 100.0, 50.0)),
                (DeviceOption::ColorExposure, range(39.0, 10000.0, 156.0)),
                (DeviceOption::ColorGain, range(0.0, 128.0, 64.0)),
                (DeviceOption::ColorEnableAutoExposure, range(0.0, 1.0, 1.0)),
            ],
        }
    }
}

/// Configured mode of one sub-device
struct Subdevice {
    fps: u32,
    payload_size: usize,
    callback: RawFrameCallback,
    next_counter: u32,
}

/// Transfer buffer bookkeeping shared with continuations
#[derive(Debug, Default)]
struct Buffers {
    limit: AtomicUsize,
    outstanding: AtomicUsize,
    delivered: AtomicU64,
    released: AtomicU64,
    starved: AtomicU64,
}

struct Shared {
    info: DeviceInfo,
    config: MockTransportConfig,
    subdevices: Mutex<HashMap<usize, Subdevice>>,
    /// Held for reading while a frame callback runs
    gate: RwLock<bool>,
    buffers: Arc<Buffers>,
    data_handler: Mutex<Option<(usize, DataChannelCallback)>>,
    acquiring: AtomicBool,
}

/// Mock USB/UVC depth camera
pub struct MockUvcDevice {
    shared: Arc<Shared>,
    frame_threads: Mutex<Vec<JoinHandle<()>>>,
    motion_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MockUvcDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self::with_config(info, MockTransportConfig::default())
    }

    pub fn with_config(info: DeviceInfo, config: MockTransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                info,
                config,
                subdevices: Mutex::new(HashMap::new()),
                gate: RwLock::new(false),
                buffers: Arc::new(Buffers::default()),
                data_handler: Mutex::new(None),
                acquiring: AtomicBool::new(false),
            }),
            frame_threads: Mutex::new(Vec::new()),
            motion_thread: Mutex::new(None),
        }
    }

    pub fn is_streaming(&self) -> bool {
        *self.shared.gate.read()
    }

    pub fn is_acquiring(&self) -> bool {
        self.shared.acquiring.load(Ordering::SeqCst)
    }

    /// Sub-devices with an installed mode
    pub fn configured_subdevices(&self) -> Vec<usize> {
        let mut ids: Vec<_> = self.shared.subdevices.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Buffers handed to callbacks and not yet released
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.buffers.outstanding.load(Ordering::SeqCst)
    }

    pub fn delivered_frames(&self) -> u64 {
        self.shared.buffers.delivered.load(Ordering::SeqCst)
    }

    pub fn released_buffers(&self) -> u64 {
        self.shared.buffers.released.load(Ordering::SeqCst)
    }

    /// Frames skipped because every transfer buffer was in use
    pub fn starved_frames(&self) -> u64 {
        self.shared.buffers.starved.load(Ordering::SeqCst)
    }

    /// Deliver the next well-formed frame of `subdevice` on the calling thread
    ///
    /// Returns `false` when no transfer buffer is free.
    pub fn deliver_frame(&self, subdevice: usize, timestamp_us: u32) -> Result<bool, ContractError> {
        self.shared.deliver_generated(subdevice, Some(timestamp_us), false)
    }

    /// Deliver a frame whose trailer magic is destroyed
    pub fn deliver_corrupt_frame(&self, subdevice: usize) -> Result<bool, ContractError> {
        self.shared.deliver_generated(subdevice, None, true)
    }

    /// Deliver arbitrary bytes as one transfer
    pub fn deliver_raw(&self, subdevice: usize, data: Bytes) -> Result<bool, ContractError> {
        self.shared.deliver(subdevice, data)
    }

    /// Push bytes through the motion data channel
    pub fn deliver_motion(&self, data: &[u8]) -> Result<(), ContractError> {
        if !self.is_acquiring() {
            return Err(ContractError::transport("data acquisition is not running"));
        }
        self.shared.deliver_motion(data);
        Ok(())
    }

    fn join_frame_threads(&self) {
        let threads = std::mem::take(&mut *self.frame_threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                warn!("mock frame thread panicked");
            }
        }
    }
}

impl Shared {
    fn build_frame(payload_size: usize, counter: u32, timestamp_us: u32, corrupt: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload_size + FrameTrailer::SIZE);
        buf.put_bytes(counter as u8, payload_size);
        let mut trailer = FrameTrailer::new(timestamp_us, counter);
        if corrupt {
            trailer.magic = !FrameTrailer::MAGIC;
        }
        buf.put_slice(&trailer.encode());
        buf.freeze()
    }

    fn deliver_generated(
        &self,
        subdevice: usize,
        timestamp_us: Option<u32>,
        corrupt: bool,
    ) -> Result<bool, ContractError> {
        let frame = {
            let mut subdevices = self.subdevices.lock();
            let sub = subdevices.get_mut(&subdevice).ok_or_else(|| {
                ContractError::transport(format!("sub-device {subdevice} is not configured"))
            })?;
            let counter = sub.next_counter;
            sub.next_counter = sub.next_counter.wrapping_add(1);
            let period_us = 1_000_000 / sub.fps.max(1);
            let ts = timestamp_us.unwrap_or_else(|| counter.wrapping_mul(period_us));
            let corrupt = corrupt
                || self
                    .config
                    .corrupt_every
                    .is_some_and(|n| n > 0 && counter as u64 % n == 0);
            Self::build_frame(sub.payload_size, counter, ts, corrupt)
        };
        self.deliver(subdevice, frame)
    }

    fn deliver(&self, subdevice: usize, data: Bytes) -> Result<bool, ContractError> {
        let streaming = self.gate.read();
        if !*streaming {
            return Err(ContractError::transport("device is not streaming"));
        }
        let callback = self
            .subdevices
            .lock()
            .get(&subdevice)
            .map(|s| s.callback.clone())
            .ok_or_else(|| {
                ContractError::transport(format!("sub-device {subdevice} is not configured"))
            })?;

        let buffers = self.buffers.clone();
        let limit = buffers.limit.load(Ordering::SeqCst);
        if buffers.outstanding.fetch_add(1, Ordering::SeqCst) >= limit {
            buffers.outstanding.fetch_sub(1, Ordering::SeqCst);
            buffers.starved.fetch_add(1, Ordering::SeqCst);
            trace!(subdevice, "no free transfer buffer, frame skipped");
            return Ok(false);
        }
        buffers.delivered.fetch_add(1, Ordering::SeqCst);

        let release = buffers.clone();
        let continuation = Continuation::new(move || {
            release.outstanding.fetch_sub(1, Ordering::SeqCst);
            release.released.fetch_add(1, Ordering::SeqCst);
        });
        callback(RawFrame { data, continuation });
        Ok(true)
    }

    fn deliver_motion(&self, data: &[u8]) {
        if let Some((_, handler)) = self.data_handler.lock().as_mut() {
            handler(data);
        }
    }
}

impl UvcTransport for MockUvcDevice {
    #[instrument(name = "mock_uvc_set_mode", skip(self, callback))]
    fn set_subdevice_mode(
        &self,
        subdevice: usize,
        width: u32,
        height: u32,
        fourcc: u32,
        fps: u32,
        callback: RawFrameCallback,
    ) -> Result<(), ContractError> {
        if self.shared.config.fail_set_mode.contains(&subdevice) {
            return Err(ContractError::transport(format!(
                "injected failure configuring sub-device {subdevice}"
            )));
        }
        if self.is_streaming() {
            return Err(ContractError::transport("cannot change modes while streaming"));
        }
        let mode = self
            .shared
            .info
            .modes_for(subdevice)
            .find(|m| {
                m.width == width
                    && m.height == height
                    && m.fps == fps
                    && m.pixel_format.code() == fourcc
            })
            .ok_or_else(|| {
                ContractError::transport(format!(
                    "sub-device {subdevice} has no {width}x{height}@{fps} mode for fourcc {fourcc:#010x}"
                ))
            })?;

        self.shared.subdevices.lock().insert(
            subdevice,
            Subdevice {
                fps,
                payload_size: mode.payload_size(),
                callback,
                next_counter: 1,
            },
        );
        Ok(())
    }

    #[instrument(name = "mock_uvc_start_streaming", skip(self))]
    fn start_streaming(&self, num_transfer_buffers: usize) -> Result<(), ContractError> {
        if self.shared.config.fail_start {
            return Err(ContractError::transport("injected failure starting stream"));
        }
        {
            let mut streaming = self.shared.gate.write();
            if *streaming {
                return Err(ContractError::transport("already streaming"));
            }
            *streaming = true;
        }
        self.shared
            .buffers
            .limit
            .store(num_transfer_buffers.max(1), Ordering::SeqCst);

        if self.shared.config.paced {
            let plan: Vec<(usize, u32)> = self
                .shared
                .subdevices
                .lock()
                .iter()
                .map(|(id, s)| (*id, s.fps))
                .collect();
            let mut threads = self.frame_threads.lock();
            for (subdevice, fps) in plan {
                let shared = self.shared.clone();
                let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
                threads.push(thread::spawn(move || {
                    debug!(subdevice, fps, "mock frame thread started");
                    while *shared.gate.read() {
                        if let Err(e) = shared.deliver_generated(subdevice, None, false) {
                            trace!(subdevice, error = %e, "paced delivery stopped");
                            break;
                        }
                        thread::sleep(interval);
                    }
                    debug!(subdevice, "mock frame thread stopped");
                }));
            }
        }
        Ok(())
    }

    #[instrument(name = "mock_uvc_stop_streaming", skip(self))]
    fn stop_streaming(&self) -> Result<(), ContractError> {
        // Waits for every callback holding the gate
        *self.shared.gate.write() = false;
        self.join_frame_threads();
        self.shared.subdevices.lock().clear();
        Ok(())
    }

    fn set_data_channel_handler(
        &self,
        subdevice: usize,
        handler: DataChannelCallback,
    ) -> Result<(), ContractError> {
        if self.shared.info.motion_subdevice != Some(subdevice) {
            return Err(ContractError::transport(format!(
                "sub-device {subdevice} has no data channel"
            )));
        }
        *self.shared.data_handler.lock() = Some((subdevice, handler));
        Ok(())
    }

    #[instrument(name = "mock_uvc_start_data_acquisition", skip(self))]
    fn start_data_acquisition(&self) -> Result<(), ContractError> {
        if self.shared.acquiring.swap(true, Ordering::SeqCst) {
            return Err(ContractError::transport("data acquisition already running"));
        }
        let rate = self.shared.config.motion_rate_hz;
        if rate > 0.0 {
            let shared = self.shared.clone();
            let interval = Duration::from_secs_f64(1.0 / rate);
            *self.motion_thread.lock() = Some(thread::spawn(move || {
                let period_us = (1_000_000.0 / rate) as u32;
                let mut frame_number = 0u32;
                while shared.acquiring.load(Ordering::SeqCst) {
                    frame_number = frame_number.wrapping_add(1);
                    let ticks = frame_number.wrapping_mul(period_us);
                    let batch = MotionPacket::encode_batch(&[
                        MotionPacket::imu(EventSource::Accel, ticks, frame_number, [0.0, 0.0, 9.81]),
                        MotionPacket::imu(EventSource::Gyro, ticks, frame_number, [0.0; 3]),
                        MotionPacket::timestamp(EventSource::Video, ticks, frame_number),
                    ]);
                    shared.deliver_motion(&batch);
                    thread::sleep(interval);
                }
            }));
        }
        Ok(())
    }

    #[instrument(name = "mock_uvc_stop_data_acquisition", skip(self))]
    fn stop_data_acquisition(&self) -> Result<(), ContractError> {
        if !self.shared.acquiring.swap(false, Ordering::SeqCst) {
            return Err(ContractError::transport("data acquisition is not running"));
        }
        if let Some(handle) = self.motion_thread.lock().take() {
            if handle.join().is_err() {
                warn!("mock motion thread panicked");
            }
        }
        *self.shared.data_handler.lock() = None;
        Ok(())
    }

    fn pu_control_range(
        &self,
        subdevice: usize,
        option: DeviceOption,
    ) -> Result<OptionRange, ContractError> {
        if !option.is_pu_control() || self.shared.info.modes_for(subdevice).next().is_none() {
            return Err(ContractError::option_not_supported(option));
        }
        self.shared
            .config
            .pu_ranges
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, r)| *r)
            .ok_or_else(|| ContractError::option_not_supported(option))
    }
}

impl Drop for MockUvcDevice {
    fn drop(&mut self) {
        *self.shared.gate.write() = false;
        self.join_frame_threads();
        self.shared.acquiring.store(false, Ordering::SeqCst);
        if let Some(handle) = self.motion_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
