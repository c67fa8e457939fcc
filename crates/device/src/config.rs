//! Stream configuration and acquisition metrics

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{
    ContractError, DeviceInfo, DeviceProfile, MotionCallback, Preset, StreamId, StreamRequest,
    TimestampCallback,
};
use sync_engine::FrameRef;

/// Invoked on the transport thread with every committed frame of a stream
pub type FrameCallback = Arc<dyn Fn(FrameRef) + Send + Sync>;

/// How the current request of a stream was made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestOrigin {
    #[default]
    Explicit,
    /// Through a named preset; mode selection may relax resolution and fps
    Preset(Preset),
}

/// Requests, callbacks and capability table of one device
#[derive(Clone)]
pub struct StreamConfig {
    info: Arc<DeviceInfo>,
    requests: [StreamRequest; StreamId::NATIVE_COUNT],
    origins: [RequestOrigin; StreamId::NATIVE_COUNT],
    callbacks: [Option<FrameCallback>; StreamId::NATIVE_COUNT],
    motion_enabled: bool,
    motion_callback: Option<MotionCallback>,
    timestamp_callback: Option<TimestampCallback>,
}

impl StreamConfig {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info: Arc::new(info),
            requests: [StreamRequest::default(); StreamId::NATIVE_COUNT],
            origins: [RequestOrigin::Explicit; StreamId::NATIVE_COUNT],
            callbacks: Default::default(),
            motion_enabled: false,
            motion_callback: None,
            timestamp_callback: None,
        }
    }

    /// Build a configuration with every stream of a profile enabled
    ///
    /// # Errors
    /// `UnsupportedStream` for unmapped streams or undeclared presets.
    pub fn from_profile(profile: &DeviceProfile) -> Result<Self, ContractError> {
        let mut config = Self::new(profile.device.clone());
        for entry in &profile.streams {
            match entry.preset {
                Some(preset) => config.enable_preset(entry.stream, preset)?,
                None => config.enable(entry.stream, entry.request())?,
            }
        }
        config.motion_enabled = profile.motion_tracking;
        Ok(config)
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn shared_info(&self) -> Arc<DeviceInfo> {
        self.info.clone()
    }

    fn native_index(&self, stream: StreamId) -> Result<usize, ContractError> {
        if !stream.is_native() || self.info.subdevice_of(stream).is_none() {
            return Err(ContractError::unsupported_stream(
                stream,
                "no sub-device produces this stream",
            ));
        }
        Ok(stream.index())
    }

    /// Current request of `stream`; derived streams are never enabled
    pub fn request(&self, stream: StreamId) -> StreamRequest {
        self.requests
            .get(stream.index())
            .copied()
            .unwrap_or_default()
    }

    pub fn origin(&self, stream: StreamId) -> RequestOrigin {
        self.origins
            .get(stream.index())
            .copied()
            .unwrap_or_default()
    }

    #[inline]
    pub fn is_enabled(&self, stream: StreamId) -> bool {
        self.request(stream).enabled
    }

    /// Enabled native streams, in stream order
    pub fn enabled_streams(&self) -> Vec<StreamId> {
        StreamId::NATIVE
            .into_iter()
            .filter(|s| self.is_enabled(*s))
            .collect()
    }

    pub fn enable(&mut self, stream: StreamId, request: StreamRequest) -> Result<(), ContractError> {
        let index = self.native_index(stream)?;
        self.requests[index] = StreamRequest {
            enabled: true,
            ..request
        };
        self.origins[index] = RequestOrigin::Explicit;
        Ok(())
    }

    pub fn enable_preset(&mut self, stream: StreamId, preset: Preset) -> Result<(), ContractError> {
        let index = self.native_index(stream)?;
        let entry = self.info.preset(stream, preset).ok_or_else(|| {
            ContractError::unsupported_stream(stream, format!("preset {preset:?} is not declared"))
        })?;
        self.requests[index] = entry.request();
        self.origins[index] = RequestOrigin::Preset(preset);
        Ok(())
    }

    pub fn disable(&mut self, stream: StreamId) -> Result<(), ContractError> {
        let index = self.native_index(stream)?;
        self.requests[index] = StreamRequest::default();
        self.origins[index] = RequestOrigin::Explicit;
        Ok(())
    }

    pub fn callback(&self, stream: StreamId) -> Option<FrameCallback> {
        self.callbacks.get(stream.index()).cloned().flatten()
    }

    /// Install or clear the frame callback of a native stream
    pub fn set_callback(
        &mut self,
        stream: StreamId,
        callback: Option<FrameCallback>,
    ) -> Result<(), ContractError> {
        let index = self.native_index(stream)?;
        self.callbacks[index] = callback;
        Ok(())
    }

    #[inline]
    pub fn motion_enabled(&self) -> bool {
        self.motion_enabled
    }

    pub fn set_motion_enabled(&mut self, enabled: bool) {
        self.motion_enabled = enabled;
    }

    pub fn motion_callback(&self) -> Option<MotionCallback> {
        self.motion_callback.clone()
    }

    pub fn set_motion_callback(&mut self, callback: Option<MotionCallback>) {
        self.motion_callback = callback;
    }

    pub fn timestamp_callback(&self) -> Option<TimestampCallback> {
        self.timestamp_callback.clone()
    }

    pub fn set_timestamp_callback(&mut self, callback: Option<TimestampCallback>) {
        self.timestamp_callback = callback;
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("device", &self.info.name)
            .field("requests", &self.requests)
            .field("origins", &self.origins)
            .field("motion_enabled", &self.motion_enabled)
            .finish()
    }
}

/// Counters of the transport callbacks
#[derive(Debug, Default)]
pub struct DeviceMetrics {
    /// Buffers delivered by the transport
    pub frames_received: AtomicU64,

    /// Buffers rejected by the timestamp reader
    pub frames_invalid: AtomicU64,

    /// Frames that could not get an archive slot
    pub frames_dropped: AtomicU64,

    /// Frames committed to the archive
    pub frames_committed: AtomicU64,

    /// Frame callbacks invoked
    pub callbacks_invoked: AtomicU64,

    /// Motion-module packets forwarded to callbacks
    pub motion_packets: AtomicU64,
}

impl DeviceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.frames_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.frames_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback(&self) {
        self.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_motion_packets(&self, count: usize) {
        self.motion_packets.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceMetricsSnapshot {
        DeviceMetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_committed: self.frames_committed.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            motion_packets: self.motion_packets.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeviceMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceMetricsSnapshot {
    pub frames_received: u64,
    pub frames_invalid: u64,
    pub frames_dropped: u64,
    pub frames_committed: u64,
    pub callbacks_invoked: u64,
    pub motion_packets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Format, PresetEntry, SubdeviceMapping};

    fn info() -> DeviceInfo {
        DeviceInfo {
            name: "test".to_string(),
            serial: String::new(),
            firmware_version: String::new(),
            stream_subdevices: vec![
                SubdeviceMapping {
                    stream: StreamId::Depth,
                    subdevice: 0,
                },
                SubdeviceMapping {
                    stream: StreamId::Color,
                    subdevice: 1,
                },
            ],
            modes: Vec::new(),
            presets: vec![PresetEntry {
                stream: StreamId::Depth,
                preset: Preset::BestQuality,
                width: 640,
                height: 480,
                format: Format::Z16,
                fps: 30,
            }],
            options: Vec::new(),
            capabilities: Vec::new(),
            num_transfer_buffers: 4,
            depth_scale: 0.001,
            timestamp_reader: Default::default(),
            motion_subdevice: None,
            key_stream_priority: vec![StreamId::Color],
        }
    }

    #[test]
    fn test_enable_and_disable() {
        let mut config = StreamConfig::new(info());
        config
            .enable(StreamId::Color, StreamRequest::new(640, 480, Format::Rgb8, 30))
            .unwrap();
        assert!(config.is_enabled(StreamId::Color));
        assert_eq!(config.enabled_streams(), vec![StreamId::Color]);

        config.disable(StreamId::Color).unwrap();
        assert!(!config.is_enabled(StreamId::Color));
        assert!(config.enabled_streams().is_empty());
    }

    #[test]
    fn test_unmapped_stream_leaves_config_unchanged() {
        let mut config = StreamConfig::new(info());
        config
            .enable(StreamId::Depth, StreamRequest::new(0, 0, Format::Z16, 0))
            .unwrap();

        let err = config
            .enable(StreamId::Fisheye, StreamRequest::new(640, 480, Format::Raw8, 30))
            .unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedStream { .. }));
        assert!(config
            .enable(StreamId::Points, StreamRequest::default())
            .is_err());
        assert_eq!(config.enabled_streams(), vec![StreamId::Depth]);
    }

    #[test]
    fn test_preset_request() {
        let mut config = StreamConfig::new(info());
        config.enable_preset(StreamId::Depth, Preset::BestQuality).unwrap();
        assert_eq!(
            config.request(StreamId::Depth),
            StreamRequest::new(640, 480, Format::Z16, 30)
        );
        assert_eq!(
            config.origin(StreamId::Depth),
            RequestOrigin::Preset(Preset::BestQuality)
        );

        assert!(config
            .enable_preset(StreamId::Color, Preset::LargestImage)
            .is_err());
        assert!(!config.is_enabled(StreamId::Color));
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = DeviceMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_invalid();
        metrics.record_motion_packets(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.frames_invalid, 1);
        assert_eq!(snapshot.motion_packets, 3);
    }
}
