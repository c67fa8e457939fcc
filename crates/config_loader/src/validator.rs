//! Profile validation
//!
//! Rules:
//! - device name is non-empty
//! - only native streams are mapped, each at most once
//! - modes have positive dimensions/fps, are unique per sub-device and
//!   only produce streams mapped to their own sub-device
//! - presets and requested streams reference mapped streams
//! - option ranges satisfy `min <= default <= max` and `step > 0`
//! - transfer buffers and archive capacities are non-zero

use std::collections::HashSet;

use contracts::{ContractError, DeviceInfo, DeviceProfile, SyncTolerance};

/// Validate a full profile
///
/// Returns the first error encountered.
pub fn validate(profile: &DeviceProfile) -> Result<(), ContractError> {
    validate_device_info(&profile.device)?;
    validate_stream_requests(profile)?;
    validate_archive(profile)?;
    Ok(())
}

/// Validate a capability table on its own
pub fn validate_device_info(info: &DeviceInfo) -> Result<(), ContractError> {
    if info.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "device.name",
            "device name cannot be empty",
        ));
    }
    validate_subdevice_mappings(info)?;
    validate_modes(info)?;
    validate_presets(info)?;
    validate_options(info)?;

    if info.num_transfer_buffers == 0 {
        return Err(ContractError::config_validation(
            "device.num_transfer_buffers",
            "num_transfer_buffers must be > 0",
        ));
    }
    Ok(())
}

fn validate_subdevice_mappings(info: &DeviceInfo) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for mapping in &info.stream_subdevices {
        if !mapping.stream.is_native() {
            return Err(ContractError::config_validation(
                format!("device.stream_subdevices[stream={}]", mapping.stream),
                "only native streams can be mapped to a sub-device",
            ));
        }
        if !seen.insert(mapping.stream) {
            return Err(ContractError::config_validation(
                format!("device.stream_subdevices[stream={}]", mapping.stream),
                "duplicate stream mapping",
            ));
        }
    }
    Ok(())
}

fn validate_modes(info: &DeviceInfo) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, mode) in info.modes.iter().enumerate() {
        let field = |name: &str| format!("device.modes[{idx}].{name}");

        if mode.width == 0 || mode.height == 0 {
            return Err(ContractError::config_validation(
                field("width/height"),
                format!("dimensions must be > 0, got {}x{}", mode.width, mode.height),
            ));
        }
        if mode.fps == 0 {
            return Err(ContractError::config_validation(field("fps"), "fps must be > 0"));
        }
        if mode.pixel_format.fourcc.is_empty() || mode.pixel_format.fourcc.len() > 4 {
            return Err(ContractError::config_validation(
                field("pixel_format.fourcc"),
                format!("fourcc must be 1-4 characters, got '{}'", mode.pixel_format.fourcc),
            ));
        }
        if mode.pixel_format.bytes_per_pixel == 0 {
            return Err(ContractError::config_validation(
                field("pixel_format.bytes_per_pixel"),
                "bytes_per_pixel must be > 0",
            ));
        }
        if mode.outputs.is_empty() {
            return Err(ContractError::config_validation(
                field("outputs"),
                "mode must produce at least one stream",
            ));
        }
        for output in &mode.outputs {
            if info.subdevice_of(output.stream) != Some(mode.subdevice) {
                return Err(ContractError::config_validation(
                    field("outputs"),
                    format!(
                        "stream {} is not mapped to sub-device {}",
                        output.stream, mode.subdevice
                    ),
                ));
            }
        }

        let key = (
            mode.subdevice,
            mode.width,
            mode.height,
            mode.pixel_format.fourcc.as_str(),
            mode.fps,
            mode.outputs.as_slice(),
        );
        if !seen.insert(key) {
            return Err(ContractError::config_validation(
                field("subdevice"),
                "duplicate mode for sub-device",
            ));
        }
    }
    Ok(())
}

fn validate_presets(info: &DeviceInfo) -> Result<(), ContractError> {
    for preset in &info.presets {
        if info.subdevice_of(preset.stream).is_none() {
            return Err(ContractError::config_validation(
                format!("device.presets[stream={}]", preset.stream),
                "preset references an unmapped stream",
            ));
        }
    }
    Ok(())
}

fn validate_options(info: &DeviceInfo) -> Result<(), ContractError> {
    for entry in &info.options {
        let field = format!("device.options[option={}]", entry.option);
        if entry.step <= 0.0 {
            return Err(ContractError::config_validation(field, "step must be > 0"));
        }
        if !(entry.min <= entry.default && entry.default <= entry.max) {
            return Err(ContractError::config_validation(
                field,
                format!(
                    "expected min <= default <= max, got {} / {} / {}",
                    entry.min, entry.default, entry.max
                ),
            ));
        }
    }
    Ok(())
}

fn validate_stream_requests(profile: &DeviceProfile) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for request in &profile.streams {
        let field = format!("streams[stream={}]", request.stream);
        if profile.device.subdevice_of(request.stream).is_none() {
            return Err(ContractError::config_validation(
                field,
                "stream is not supported by the device",
            ));
        }
        if !seen.insert(request.stream) {
            return Err(ContractError::config_validation(field, "duplicate stream request"));
        }
        if let Some(preset) = request.preset {
            if profile.device.preset(request.stream, preset).is_none() {
                return Err(ContractError::config_validation(
                    field,
                    format!("preset {preset:?} is not declared for this stream"),
                ));
            }
        }
    }

    if profile.motion_tracking && profile.device.motion_subdevice.is_none() {
        return Err(ContractError::config_validation(
            "motion_tracking",
            "device has no motion_subdevice",
        ));
    }
    Ok(())
}

fn validate_archive(profile: &DeviceProfile) -> Result<(), ContractError> {
    let archive = &profile.archive;
    let capacities = [
        ("archive.history_depth", archive.history_depth),
        ("archive.slots_per_stream", archive.slots_per_stream),
        ("archive.max_published_framesets", archive.max_published_framesets),
        ("archive.max_detached_refs", archive.max_detached_refs),
    ];
    for (field, value) in capacities {
        if value == 0 {
            return Err(ContractError::config_validation(field, "capacity must be > 0"));
        }
    }

    match archive.tolerance {
        SyncTolerance::Millis(v) | SyncTolerance::FramePeriods(v) if !(v.is_finite() && v >= 0.0) => {
            Err(ContractError::config_validation(
                "archive.tolerance",
                format!("tolerance must be a finite value >= 0, got {v}"),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ArchiveConfig, DeviceOption, Format, HardwareMode, OptionEntry, OutputSpec, PixelFormat,
        Preset, PresetEntry, StreamId, StreamRequestConfig, SubdeviceMapping, TimestampReaderKind,
        Unpacker,
    };

    fn minimal_profile() -> DeviceProfile {
        DeviceProfile {
            device: DeviceInfo {
                name: "Mock".into(),
                serial: "0001".into(),
                firmware_version: "1.0".into(),
                stream_subdevices: vec![SubdeviceMapping {
                    stream: StreamId::Depth,
                    subdevice: 0,
                }],
                modes: vec![HardwareMode {
                    subdevice: 0,
                    width: 640,
                    height: 480,
                    pixel_format: PixelFormat::new("Z16", 2),
                    fps: 30,
                    outputs: vec![OutputSpec {
                        stream: StreamId::Depth,
                        format: Format::Z16,
                    }],
                    unpacker: Unpacker::Passthrough,
                }],
                presets: vec![PresetEntry {
                    stream: StreamId::Depth,
                    preset: Preset::BestQuality,
                    width: 640,
                    height: 480,
                    format: Format::Z16,
                    fps: 30,
                }],
                options: vec![OptionEntry {
                    option: DeviceOption::LaserPower,
                    min: 0.0,
                    max: 16.0,
                    step: 1.0,
                    default: 10.0,
                }],
                capabilities: vec![],
                num_transfer_buffers: 4,
                depth_scale: 0.001,
                timestamp_reader: TimestampReaderKind::Metadata,
                motion_subdevice: None,
                key_stream_priority: vec![StreamId::Color],
            },
            streams: vec![StreamRequestConfig {
                stream: StreamId::Depth,
                preset: None,
                width: 640,
                height: 480,
                format: Format::Z16,
                fps: 30,
            }],
            archive: ArchiveConfig::default(),
            motion_tracking: false,
        }
    }

    #[test]
    fn test_valid_profile() {
        assert!(validate(&minimal_profile()).is_ok());
    }

    #[test]
    fn test_empty_name() {
        let mut p = minimal_profile();
        p.device.name = "  ".into();
        let err = validate(&p).unwrap_err();
        assert!(err.to_string().contains("device.name"));
    }

    #[test]
    fn test_duplicate_mode() {
        let mut p = minimal_profile();
        let mode = p.device.modes[0].clone();
        p.device.modes.push(mode);
        assert!(validate(&p).unwrap_err().to_string().contains("duplicate mode"));
    }

    #[test]
    fn test_mode_output_on_foreign_subdevice() {
        let mut p = minimal_profile();
        p.device.modes[0].subdevice = 2;
        assert!(validate(&p).unwrap_err().to_string().contains("not mapped"));
    }

    #[test]
    fn test_zero_fps() {
        let mut p = minimal_profile();
        p.device.modes[0].fps = 0;
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_option_range_order() {
        let mut p = minimal_profile();
        p.device.options[0].default = 20.0;
        assert!(validate(&p).unwrap_err().to_string().contains("min <= default <= max"));

        let mut p = minimal_profile();
        p.device.options[0].step = 0.0;
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_request_for_unmapped_stream() {
        let mut p = minimal_profile();
        p.streams[0].stream = StreamId::Color;
        assert!(validate(&p).unwrap_err().to_string().contains("not supported"));
    }

    #[test]
    fn test_unknown_preset() {
        let mut p = minimal_profile();
        p.streams[0].preset = Some(Preset::HighestFramerate);
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_zero_capacity() {
        let mut p = minimal_profile();
        p.archive.max_detached_refs = 0;
        assert!(validate(&p)
            .unwrap_err()
            .to_string()
            .contains("archive.max_detached_refs"));
    }

    #[test]
    fn test_negative_tolerance() {
        let mut p = minimal_profile();
        p.archive.tolerance = SyncTolerance::Millis(-1.0);
        assert!(validate(&p).is_err());
    }

    #[test]
    fn test_motion_requires_subdevice() {
        let mut p = minimal_profile();
        p.motion_tracking = true;
        assert!(validate(&p).is_err());
        p.device.motion_subdevice = Some(3);
        assert!(validate(&p).is_ok());
    }
}
