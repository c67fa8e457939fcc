//! Device streaming controller
//!
//! Binds the selected hardware modes to transport callbacks that feed a
//! synchronizing archive, and exposes the archive's waiting API.
//!
//! State machine: `Idle -> Configuring -> Capturing -> Idle`. `Configuring`
//! covers the transitions themselves; configuration changes are only
//! accepted while `Idle`. Motion tracking runs an independent
//! `enabled x active` machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    system_time_ms, ArchiveConfig, Capability, ContractError, DeviceInfo, DeviceOption,
    DeviceProfile, Format, FrameInfo, ModeSelection, MotionCallback, MotionData, OptionRange,
    Preset, RawFrame, Source, StreamId, StreamRequest, TimestampCallback, TimestampData,
    UvcTransport,
};
use parking_lot::Mutex;
use sync_engine::{ArchiveStats, FrameRef, FrameSet, FrameView, SynchronizingArchive};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{DeviceMetrics, DeviceMetricsSnapshot, FrameCallback, StreamConfig};
use crate::motion::{MotionParser, PacketMotionParser};
use crate::selector::{select_key_stream, select_modes};
use crate::streams::{StreamMode, StreamRegistry};
use crate::timestamp::{create_timestamp_reader, FrameTimestampReader};
use crate::unpack::unpack;

/// Video acquisition state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    /// Starting or stopping
    Configuring,
    Capturing,
}

struct Inner {
    config: StreamConfig,
    archive_config: ArchiveConfig,
    registry: StreamRegistry,
    state: DeviceState,
    archive: Option<SynchronizingArchive>,
    selections: Vec<ModeSelection>,
    motion_active: bool,
}

/// One depth camera
///
/// All methods take `&self`; share it between threads behind an `Arc`.
/// Waiting calls never hold the device lock, so `stop` from another thread
/// releases them.
pub struct Device {
    transport: Arc<dyn UvcTransport>,
    inner: Mutex<Inner>,
    metrics: Arc<DeviceMetrics>,
}

impl Device {
    pub fn new(transport: Arc<dyn UvcTransport>, info: DeviceInfo) -> Self {
        Self::with_config(transport, StreamConfig::new(info), ArchiveConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn UvcTransport>,
        config: StreamConfig,
        archive_config: ArchiveConfig,
    ) -> Self {
        Self {
            transport,
            inner: Mutex::new(Inner {
                config,
                archive_config,
                registry: StreamRegistry::new(),
                state: DeviceState::Idle,
                archive: None,
                selections: Vec::new(),
                motion_active: false,
            }),
            metrics: Arc::new(DeviceMetrics::new()),
        }
    }

    /// Device with the streams, archive policy and motion flag of a profile
    pub fn from_profile(
        transport: Arc<dyn UvcTransport>,
        profile: &DeviceProfile,
    ) -> Result<Self, ContractError> {
        let config = StreamConfig::from_profile(profile)?;
        Ok(Self::with_config(transport, config, profile.archive.clone()))
    }

    // ===== Identity =====

    pub fn info(&self) -> Arc<DeviceInfo> {
        self.inner.lock().config.shared_info()
    }

    pub fn name(&self) -> String {
        self.inner.lock().config.info().name.clone()
    }

    pub fn serial(&self) -> String {
        self.inner.lock().config.info().serial.clone()
    }

    pub fn firmware_version(&self) -> String {
        self.inner.lock().config.info().firmware_version.clone()
    }

    pub fn depth_scale(&self) -> f32 {
        self.inner.lock().config.info().depth_scale
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == DeviceState::Capturing
    }

    pub fn metrics(&self) -> DeviceMetricsSnapshot {
        self.metrics.snapshot()
    }

    // ===== Stream configuration =====

    fn configure<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut StreamConfig) -> Result<T, ContractError>,
    ) -> Result<T, ContractError> {
        let mut inner = self.inner.lock();
        if inner.state != DeviceState::Idle {
            return Err(ContractError::invalid_state(
                operation,
                "streams cannot be reconfigured while capturing",
            ));
        }
        let result = f(&mut inner.config)?;
        inner.registry.invalidate();
        Ok(result)
    }

    /// Request a native stream with explicit parameters (`0` / `Any` match anything)
    ///
    /// # Errors
    /// - `InvalidState` unless idle
    /// - `UnsupportedStream` when no sub-device produces the stream
    pub fn enable_stream(
        &self,
        stream: StreamId,
        width: u32,
        height: u32,
        format: Format,
        fps: u32,
    ) -> Result<(), ContractError> {
        debug!(stream = %stream, width, height, format = %format, fps, "enable stream");
        self.configure("enable_stream", |config| {
            config.enable(stream, StreamRequest::new(width, height, format, fps))
        })
    }

    /// Request a native stream through one of the device's named presets
    pub fn enable_stream_preset(&self, stream: StreamId, preset: Preset) -> Result<(), ContractError> {
        debug!(stream = %stream, preset = ?preset, "enable stream preset");
        self.configure("enable_stream_preset", |config| {
            config.enable_preset(stream, preset)
        })
    }

    pub fn disable_stream(&self, stream: StreamId) -> Result<(), ContractError> {
        debug!(stream = %stream, "disable stream");
        self.configure("disable_stream", |config| config.disable(stream))
    }

    /// Deliver committed frames of `stream` to `callback` as well
    ///
    /// Takes effect at the next `start`.
    pub fn set_stream_callback(
        &self,
        stream: StreamId,
        callback: impl Fn(FrameRef) + Send + Sync + 'static,
    ) -> Result<(), ContractError> {
        let callback: FrameCallback = Arc::new(callback);
        self.inner.lock().config.set_callback(stream, Some(callback))
    }

    pub fn clear_stream_callback(&self, stream: StreamId) -> Result<(), ContractError> {
        self.inner.lock().config.set_callback(stream, None)
    }

    pub fn is_stream_enabled(&self, stream: StreamId) -> bool {
        self.inner.lock().config.is_enabled(stream)
    }

    /// Geometry of `stream`
    ///
    /// While capturing this is the bound mode; otherwise the mode the current
    /// requests would select.
    pub fn stream_mode(&self, stream: StreamId) -> Result<StreamMode, ContractError> {
        let inner = self.inner.lock();
        if let Some(mode) = inner.registry.mode(stream) {
            return Ok(mode);
        }
        let selections = select_modes(&inner.config, inner.config.info())?;
        let mut preview = StreamRegistry::new();
        preview.bind(&selections, &inner.config.enabled_streams());
        preview
            .mode(stream)
            .ok_or_else(|| ContractError::unsupported_stream(stream, "stream is not enabled"))
    }

    // ===== Start / stop =====

    /// Start the selected sources
    ///
    /// # Errors
    /// - `InvalidState` when a requested source is already running
    /// - `UnsupportedStream` when mode selection fails
    /// - `Transport` when the transport rejects the configuration
    #[instrument(name = "device_start", skip_all, fields(source = ?source))]
    pub fn start(&self, source: Source) -> Result<(), ContractError> {
        if source.includes_video() {
            self.start_video()?;
        }
        if source.includes_motion() {
            if let Err(e) = self.start_motion() {
                if source.includes_video() {
                    let _ = self.stop_video();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop the selected sources
    ///
    /// # Errors
    /// `InvalidState` when a requested source is not running.
    #[instrument(name = "device_stop", skip_all, fields(source = ?source))]
    pub fn stop(&self, source: Source) -> Result<(), ContractError> {
        if source.includes_video() {
            self.stop_video()?;
        }
        if source.includes_motion() {
            self.stop_motion()?;
        }
        Ok(())
    }

    fn start_video(&self) -> Result<(), ContractError> {
        let (archive, num_transfer_buffers) = {
            let mut inner = self.inner.lock();
            if inner.state != DeviceState::Idle {
                return Err(ContractError::invalid_state(
                    "start",
                    "cannot restart device without first stopping it",
                ));
            }

            let info = inner.config.shared_info();
            let selections = select_modes(&inner.config, &info)?;
            if selections.is_empty() {
                return Err(ContractError::invalid_state("start", "no stream is enabled"));
            }
            let key_stream = select_key_stream(&selections, &info.key_stream_priority);
            let archive =
                SynchronizingArchive::new(&selections, key_stream, inner.archive_config.clone());
            let reader: Arc<dyn FrameTimestampReader> =
                Arc::from(create_timestamp_reader(info.timestamp_reader));

            inner.state = DeviceState::Configuring;
            let enabled = inner.config.enabled_streams();
            inner.registry.bind(&selections, &enabled);

            for selection in &selections {
                let callbacks: Vec<Option<FrameCallback>> = selection
                    .outputs
                    .iter()
                    .map(|o| inner.config.callback(o.stream))
                    .collect();
                let handler = FrameHandler {
                    selection: selection.clone(),
                    archive: archive.clone(),
                    reader: reader.clone(),
                    callbacks,
                    key_stream,
                    metrics: self.metrics.clone(),
                };
                let mode = &selection.mode;
                let installed = self.transport.set_subdevice_mode(
                    mode.subdevice,
                    mode.width,
                    mode.height,
                    mode.pixel_format.code(),
                    mode.fps,
                    Arc::new(move |raw| handler.on_frame(raw)),
                );
                if let Err(e) = installed {
                    warn!(subdevice = mode.subdevice, error = %e, "failed to set sub-device mode");
                    // Streaming has not started, no callback can be running
                    self.release_transport(&archive);
                    Self::reset(&mut inner);
                    return Err(e);
                }
            }

            info!(
                key_stream = %key_stream,
                modes = selections.len(),
                streams = ?archive.streams(),
                "video streaming configured"
            );
            inner.selections = selections;
            inner.archive = Some(archive.clone());
            (archive, info.num_transfer_buffers)
        };

        // Frame callbacks may call back into the device, so the lock is not held here
        let started = self.transport.start_streaming(num_transfer_buffers);

        let mut inner = self.inner.lock();
        match started {
            Ok(()) => {
                inner.state = DeviceState::Capturing;
                debug!("device capturing");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to start streaming");
                drop(inner);
                self.release_transport(&archive);
                Self::reset(&mut self.inner.lock());
                Err(e)
            }
        }
    }

    /// Undo a partial start
    fn release_transport(&self, archive: &SynchronizingArchive) {
        if let Err(e) = self.transport.stop_streaming() {
            debug!(error = %e, "stop_streaming during rollback failed");
        }
        archive.flush();
    }

    fn reset(inner: &mut Inner) {
        inner.registry.invalidate();
        inner.selections.clear();
        inner.archive = None;
        inner.state = DeviceState::Idle;
    }

    fn stop_video(&self) -> Result<(), ContractError> {
        let archive = {
            let mut inner = self.inner.lock();
            if inner.state != DeviceState::Capturing {
                return Err(ContractError::invalid_state(
                    "stop",
                    "cannot stop device without first starting it",
                ));
            }
            inner.state = DeviceState::Configuring;
            inner.archive.clone()
        };

        // Returns only once no frame callback is running
        let stopped = self.transport.stop_streaming();
        if let Some(archive) = &archive {
            archive.flush();
        }

        let mut inner = self.inner.lock();
        inner.state = DeviceState::Idle;
        inner.selections.clear();
        debug!("device stopped");
        stopped
    }

    // ===== Motion tracking =====

    pub fn enable_motion_tracking(&self) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if inner.motion_active {
            return Err(ContractError::invalid_state(
                "enable_motion_tracking",
                "motion tracking cannot be reconfigured while active",
            ));
        }
        if inner.config.info().motion_subdevice.is_none() {
            return Err(ContractError::unsupported_stream(
                "motion",
                "device has no motion module",
            ));
        }
        inner.config.set_motion_enabled(true);
        Ok(())
    }

    pub fn disable_motion_tracking(&self) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if inner.motion_active {
            return Err(ContractError::invalid_state(
                "disable_motion_tracking",
                "motion tracking cannot be reconfigured while active",
            ));
        }
        inner.config.set_motion_enabled(false);
        Ok(())
    }

    pub fn is_motion_tracking_enabled(&self) -> bool {
        self.inner.lock().config.motion_enabled()
    }

    pub fn is_motion_tracking_active(&self) -> bool {
        self.inner.lock().motion_active
    }

    /// Replace the IMU sample callback
    pub fn set_motion_callback(
        &self,
        callback: impl Fn(MotionData) + Send + Sync + 'static,
    ) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if inner.motion_active {
            return Err(ContractError::invalid_state(
                "set_motion_callback",
                "motion data is active",
            ));
        }
        let callback: MotionCallback = Arc::new(callback);
        inner.config.set_motion_callback(Some(callback));
        Ok(())
    }

    /// Replace the timestamp event callback
    pub fn set_timestamp_callback(
        &self,
        callback: impl Fn(TimestampData) + Send + Sync + 'static,
    ) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if inner.motion_active {
            return Err(ContractError::invalid_state(
                "set_timestamp_callback",
                "motion data is active",
            ));
        }
        let callback: TimestampCallback = Arc::new(callback);
        inner.config.set_timestamp_callback(Some(callback));
        Ok(())
    }

    fn start_motion(&self) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if inner.motion_active {
            return Err(ContractError::invalid_state(
                "start",
                "cannot restart data acquisition without stopping first",
            ));
        }

        if inner.config.motion_enabled() {
            let subdevice = inner.config.info().motion_subdevice.ok_or_else(|| {
                ContractError::unsupported_stream("motion", "device has no motion module")
            })?;
            let motion_callback = inner.config.motion_callback();
            let timestamp_callback = inner.config.timestamp_callback();
            let metrics = self.metrics.clone();
            let mut parser = PacketMotionParser::new();

            self.transport.set_data_channel_handler(
                subdevice,
                Box::new(move |data: &[u8]| {
                    for batch in parser.parse(data) {
                        metrics.record_motion_packets(batch.len());
                        observability::record_motion_packets(batch.imu.len(), batch.timestamps.len());
                        if let Some(cb) = &motion_callback {
                            batch.imu.iter().for_each(|m| cb(*m));
                        }
                        if let Some(cb) = &timestamp_callback {
                            batch.timestamps.iter().for_each(|t| cb(*t));
                        }
                    }
                }),
            )?;
            debug!(subdevice, "motion data channel handler installed");
        }

        self.transport.start_data_acquisition()?;
        inner.motion_active = true;
        info!("motion tracking started");
        Ok(())
    }

    fn stop_motion(&self) -> Result<(), ContractError> {
        let mut inner = self.inner.lock();
        if !inner.motion_active {
            return Err(ContractError::invalid_state(
                "stop",
                "data acquisition is already stopped",
            ));
        }
        inner.motion_active = false;
        drop(inner);
        self.transport.stop_data_acquisition()?;
        info!("motion tracking stopped");
        Ok(())
    }

    // ===== Waiting API =====

    fn capturing_archive(&self) -> Option<SynchronizingArchive> {
        let inner = self.inner.lock();
        match inner.state {
            DeviceState::Capturing => inner.archive.clone(),
            _ => None,
        }
    }

    fn require_archive(&self, operation: &str) -> Result<SynchronizingArchive, ContractError> {
        self.capturing_archive()
            .ok_or_else(|| ContractError::invalid_state(operation, "device is not capturing"))
    }

    /// Advance the front frameset, blocking up to `timeout`
    ///
    /// Returns `false` when not capturing, on timeout, or once stopped.
    pub fn wait_for_frames(&self, timeout: Option<Duration>) -> bool {
        match self.capturing_archive() {
            Some(archive) => archive.wait_for_frames(timeout),
            None => false,
        }
    }

    pub fn poll_for_frames(&self) -> bool {
        match self.capturing_archive() {
            Some(archive) => archive.poll_for_frames(),
            None => false,
        }
    }

    /// Take ownership of the next frameset
    ///
    /// # Errors
    /// - `InvalidState` when not capturing
    /// - `ResourceExhausted` when too many framesets are held
    pub fn wait_for_frames_safe(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<FrameSet>, ContractError> {
        self.require_archive("wait_for_frames_safe")?
            .wait_for_frames_safe(timeout)
    }

    pub fn poll_for_frames_safe(&self) -> Result<Option<FrameSet>, ContractError> {
        self.require_archive("poll_for_frames_safe")?
            .poll_for_frames_safe()
    }

    pub fn release_frames(&self, frameset: FrameSet) {
        frameset.release();
    }

    pub fn clone_frames(&self, frameset: &FrameSet) -> Result<FrameSet, ContractError> {
        frameset.try_clone()
    }

    pub fn detach_frame(&self, frameset: &FrameSet, stream: StreamId) -> Result<FrameRef, ContractError> {
        frameset.detach(stream)
    }

    pub fn release_frame(&self, frame: FrameRef) {
        frame.release();
    }

    pub fn clone_frame(&self, frame: &FrameRef) -> Result<FrameRef, ContractError> {
        frame.try_clone()
    }

    // ===== Front frameset introspection =====

    fn front_frame(&self, stream: StreamId) -> Option<FrameView> {
        let archive = self.inner.lock().archive.clone()?;
        archive.front_frame(stream)
    }

    pub fn frame_timestamp(&self, stream: StreamId) -> Option<f64> {
        self.front_frame(stream).map(|f| f.timestamp())
    }

    pub fn frame_counter(&self, stream: StreamId) -> Option<u64> {
        self.front_frame(stream).map(|f| f.frame_counter())
    }

    pub fn frame_data(&self, stream: StreamId) -> Option<Bytes> {
        self.front_frame(stream).map(|f| f.data)
    }

    /// Modes bound by the running capture session
    pub fn selected_modes(&self) -> Vec<ModeSelection> {
        self.inner.lock().selections.clone()
    }

    /// Key stream of the current (or last) capture session
    pub fn key_stream(&self) -> Option<StreamId> {
        self.inner.lock().archive.as_ref().map(|a| a.key_stream())
    }

    pub fn archive_stats(&self) -> Option<ArchiveStats> {
        self.inner.lock().archive.as_ref().map(|a| a.stats())
    }

    // ===== Capabilities and options =====

    pub fn supports(&self, capability: Capability) -> bool {
        self.inner.lock().config.info().supports(capability)
    }

    pub fn supports_option(&self, option: DeviceOption) -> bool {
        option.is_pu_control() || self.inner.lock().config.info().option_range(option).is_some()
    }

    /// Range of a device option
    ///
    /// Processing-unit controls are queried from the color sub-device.
    ///
    /// # Errors
    /// `OptionNotSupported` when the device declares no range for `option`.
    pub fn get_option_range(&self, option: DeviceOption) -> Result<OptionRange, ContractError> {
        let info = self.info();
        if option.is_pu_control() {
            let subdevice = info
                .subdevice_of(StreamId::Color)
                .ok_or_else(|| ContractError::option_not_supported(option))?;
            return self.transport.pu_control_range(subdevice, option);
        }
        info.option_range(option)
            .ok_or_else(|| ContractError::option_not_supported(option))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.is_capturing() {
            if let Err(e) = self.stop_video() {
                warn!(error = %e, "failed to stop video on drop");
            }
        }
        if self.is_motion_tracking_active() {
            if let Err(e) = self.stop_motion() {
                warn!(error = %e, "failed to stop motion tracking on drop");
            }
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Device")
            .field("name", &inner.config.info().name)
            .field("state", &inner.state)
            .field("motion_active", &inner.motion_active)
            .finish()
    }
}

/// Transport callback state of one selected mode
struct FrameHandler {
    selection: ModeSelection,
    archive: SynchronizingArchive,
    reader: Arc<dyn FrameTimestampReader>,
    /// Per output of `selection`
    callbacks: Vec<Option<FrameCallback>>,
    key_stream: StreamId,
    metrics: Arc<DeviceMetrics>,
}

impl FrameHandler {
    fn first_stream(&self) -> StreamId {
        self.selection
            .outputs
            .first()
            .map(|o| o.stream)
            .unwrap_or(StreamId::Depth)
    }

    /// Validate, stamp, unpack and commit one transport buffer
    ///
    /// Every early return drops `continuation`, which hands the buffer back.
    fn on_frame(&self, raw: RawFrame) {
        let system_time = system_time_ms();
        self.metrics.record_received();
        let RawFrame { data, continuation } = raw;
        let mode = &self.selection.mode;

        if !self.reader.validate_frame(mode, &data) {
            self.metrics.record_invalid();
            observability::record_frame_dropped(self.first_stream(), "invalid");
            debug!(subdevice = mode.subdevice, len = data.len(), "dropping invalid frame");
            return;
        }

        let info = FrameInfo {
            timestamp: self.reader.get_frame_timestamp(mode, &data),
            frame_counter: self.reader.get_frame_counter(mode, &data),
            system_time,
        };
        let requires_processing = self.selection.requires_processing();

        let mut buffers = Vec::with_capacity(self.selection.outputs.len());
        for output in &self.selection.outputs {
            match self.archive.alloc_frame(output.stream, info, requires_processing) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    self.metrics.record_dropped();
                    debug!(stream = %output.stream, error = %e, "no slot for frame");
                    return;
                }
            }
        }

        let mut continuation = Some(continuation);
        if requires_processing {
            let mut dest: Vec<&mut [u8]> = buffers.iter_mut().map(|b| b.data_mut()).collect();
            if let Err(e) = unpack(&self.selection, &mut dest, &data) {
                warn!(subdevice = mode.subdevice, error = %e, "unpack failed");
                return;
            }
        } else if let (Some(buffer), Some(cont)) = (buffers.first_mut(), continuation.take()) {
            let payload = mode.payload_size().min(data.len());
            buffer.attach_continuation(data.slice(..payload), cont);
        }

        // The key output goes last so its frameset sees every output of this buffer
        let mut outputs: Vec<_> = buffers.into_iter().zip(&self.callbacks).collect();
        outputs.sort_by_key(|(buffer, _)| buffer.stream() == self.key_stream);

        let mut committed = Vec::with_capacity(outputs.len());
        for (buffer, callback) in outputs {
            let stream = buffer.stream();
            match self.archive.commit_frame(buffer) {
                Ok(true) => {
                    self.metrics.record_committed();
                    committed.push((stream, callback));
                }
                Ok(false) => {}
                Err(e) => trace!(stream = %stream, error = %e, "commit rejected"),
            }
        }

        // Copy path: outputs no longer reference the transport buffer
        if let Some(cont) = continuation.take() {
            cont.fire();
        }

        for (stream, callback) in committed {
            let Some(callback) = callback else {
                continue;
            };
            if let Some(frame) = self.archive.track_frame(stream) {
                self.metrics.record_callback();
                callback(frame);
            }
        }
    }
}
