//! Device capability table and device profile definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ArchiveConfig, Format, HardwareMode, Preset, StreamId, StreamRequest};

/// Maps a native stream to the physical sub-device that produces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdeviceMapping {
    pub stream: StreamId,
    pub subdevice: usize,
}

/// Request declared for a (stream, preset) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub stream: StreamId,
    pub preset: Preset,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub fps: u32,
}

impl PresetEntry {
    pub fn request(&self) -> StreamRequest {
        StreamRequest::new(self.width, self.height, self.format, self.fps)
    }
}

/// Device control option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOption {
    ColorBacklightCompensation,
    ColorBrightness,
    ColorContrast,
    ColorExposure,
    ColorGain,
    ColorGamma,
    ColorHue,
    ColorSaturation,
    ColorSharpness,
    ColorWhiteBalance,
    ColorEnableAutoExposure,
    ColorEnableAutoWhiteBalance,
    LaserPower,
    Accuracy,
    MotionRange,
    FilterOption,
    ConfidenceThreshold,
    EmitterEnabled,
    DepthUnits,
}

impl DeviceOption {
    /// Whether the option is a standard UVC processing-unit control
    ///
    /// Ranges of these controls come from the transport rather than the table.
    pub fn is_pu_control(self) -> bool {
        matches!(
            self,
            DeviceOption::ColorBacklightCompensation
                | DeviceOption::ColorBrightness
                | DeviceOption::ColorContrast
                | DeviceOption::ColorExposure
                | DeviceOption::ColorGain
                | DeviceOption::ColorGamma
                | DeviceOption::ColorHue
                | DeviceOption::ColorSaturation
                | DeviceOption::ColorSharpness
                | DeviceOption::ColorWhiteBalance
                | DeviceOption::ColorEnableAutoExposure
                | DeviceOption::ColorEnableAutoWhiteBalance
        )
    }
}

impl fmt::Display for DeviceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Range of a device option
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

/// Option range declared in the capability table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub option: DeviceOption,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

impl OptionEntry {
    pub fn range(&self) -> OptionRange {
        OptionRange {
            min: self.min,
            max: self.max,
            step: self.step,
            default: self.default,
        }
    }
}

/// Device capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Depth,
    Color,
    Infrared,
    Infrared2,
    Fisheye,
    MotionEvents,
    MotionModuleFwUpdate,
    AdapterBoard,
    Enumeration,
}

/// How frame timestamps and counters are obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampReaderKind {
    /// Parse the metadata trailer appended to each transport buffer
    #[default]
    Metadata,
    /// Synthesize from arrival order and the mode's frame rate
    Serial,
}

fn default_transfer_buffers() -> usize {
    4
}

fn default_depth_scale() -> f32 {
    0.001
}

fn default_key_stream_priority() -> Vec<StreamId> {
    vec![
        StreamId::Color,
        StreamId::Infrared2,
        StreamId::Infrared,
        StreamId::Fisheye,
    ]
}

/// Static capability table of one device model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub firmware_version: String,
    pub stream_subdevices: Vec<SubdeviceMapping>,
    /// Hardware modes in preference order
    pub modes: Vec<HardwareMode>,
    #[serde(default)]
    pub presets: Vec<PresetEntry>,
    #[serde(default)]
    pub options: Vec<OptionEntry>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_transfer_buffers")]
    pub num_transfer_buffers: usize,
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f32,
    #[serde(default)]
    pub timestamp_reader: TimestampReaderKind,
    /// Sub-device carrying the motion module data channel
    #[serde(default)]
    pub motion_subdevice: Option<usize>,
    #[serde(default = "default_key_stream_priority")]
    pub key_stream_priority: Vec<StreamId>,
}

impl DeviceInfo {
    /// Sub-device producing `stream`, if the stream is mapped
    pub fn subdevice_of(&self, stream: StreamId) -> Option<usize> {
        self.stream_subdevices
            .iter()
            .find(|m| m.stream == stream)
            .map(|m| m.subdevice)
    }

    pub fn preset(&self, stream: StreamId, preset: Preset) -> Option<&PresetEntry> {
        self.presets
            .iter()
            .find(|p| p.stream == stream && p.preset == preset)
    }

    pub fn option_range(&self, option: DeviceOption) -> Option<OptionRange> {
        self.options
            .iter()
            .find(|o| o.option == option)
            .map(OptionEntry::range)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Modes of one sub-device, in preference order
    pub fn modes_for(&self, subdevice: usize) -> impl Iterator<Item = &HardwareMode> + '_ {
        self.modes.iter().filter(move |m| m.subdevice == subdevice)
    }
}

/// One entry of the `[[streams]]` list of a device profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequestConfig {
    pub stream: StreamId,
    /// Enable through a named preset instead of explicit parameters
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub fps: u32,
}

impl StreamRequestConfig {
    pub fn request(&self) -> StreamRequest {
        StreamRequest::new(self.width, self.height, self.format, self.fps)
    }
}

/// Device plus the streams to enable and the archive policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device: DeviceInfo,
    #[serde(default)]
    pub streams: Vec<StreamRequestConfig>,
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Also start the motion module when running the profile
    #[serde(default)]
    pub motion_tracking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_defaults() {
        let json = r#"{
            "name": "Mock",
            "stream_subdevices": [{"stream": "depth", "subdevice": 0}],
            "modes": []
        }"#;
        let info: DeviceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.num_transfer_buffers, 4);
        assert_eq!(info.subdevice_of(StreamId::Depth), Some(0));
        assert_eq!(info.subdevice_of(StreamId::Color), None);
        assert_eq!(info.key_stream_priority[0], StreamId::Color);
        assert_eq!(info.timestamp_reader, TimestampReaderKind::Metadata);
    }

    #[test]
    fn test_pu_controls() {
        assert!(DeviceOption::ColorGain.is_pu_control());
        assert!(!DeviceOption::LaserPower.is_pu_control());
    }
}
