//! Mapping of stream requests onto hardware capture modes

use std::collections::BTreeMap;

use contracts::{ContractError, DeviceInfo, HardwareMode, ModeSelection, StreamId, StreamRequest};
use tracing::debug;

use crate::config::{RequestOrigin, StreamConfig};

/// Whether `mode` produces every stream of `streams` as requested
fn covers(mode: &HardwareMode, streams: &[(StreamId, StreamRequest)]) -> bool {
    streams.iter().all(|(stream, request)| {
        mode.output_format(*stream)
            .is_some_and(|format| request.is_satisfied_by(mode, format))
    })
}

/// Request with resolution and fps turned into wildcards
fn relaxed(request: StreamRequest) -> StreamRequest {
    StreamRequest {
        width: 0,
        height: 0,
        fps: 0,
        ..request
    }
}

/// Choose one hardware mode per sub-device for the enabled requests
///
/// Modes are tried in capability-table order. Streams enabled through a
/// preset fall back to any mode producing the preset's format when nothing
/// matches exactly.
///
/// # Errors
/// `UnsupportedStream` when a stream has no sub-device or no mode satisfies
/// the requests of a sub-device.
pub fn select_modes(
    config: &StreamConfig,
    info: &DeviceInfo,
) -> Result<Vec<ModeSelection>, ContractError> {
    let mut by_subdevice: BTreeMap<usize, Vec<(StreamId, StreamRequest)>> = BTreeMap::new();
    for stream in config.enabled_streams() {
        let subdevice = info.subdevice_of(stream).ok_or_else(|| {
            ContractError::unsupported_stream(stream, "no sub-device produces this stream")
        })?;
        by_subdevice
            .entry(subdevice)
            .or_default()
            .push((stream, config.request(stream)));
    }

    let mut selections = Vec::with_capacity(by_subdevice.len());
    for (subdevice, streams) in by_subdevice {
        let exact = info.modes_for(subdevice).find(|m| covers(m, &streams));
        let mode = match exact {
            Some(mode) => Some(mode),
            None => {
                let fallback: Vec<_> = streams
                    .iter()
                    .map(|(stream, request)| match config.origin(*stream) {
                        RequestOrigin::Preset(_) => (*stream, relaxed(*request)),
                        RequestOrigin::Explicit => (*stream, *request),
                    })
                    .collect();
                let mode = (fallback != streams)
                    .then(|| info.modes_for(subdevice).find(|m| covers(m, &fallback)))
                    .flatten();
                if let Some(mode) = mode {
                    debug!(
                        subdevice,
                        width = mode.width,
                        height = mode.height,
                        fps = mode.fps,
                        "preset request relaxed to available mode"
                    );
                }
                mode
            }
        };

        let Some(mode) = mode else {
            let names: Vec<_> = streams.iter().map(|(s, _)| s.as_str()).collect();
            return Err(ContractError::unsupported_stream(
                names.join(", "),
                format!("no hardware mode of sub-device {subdevice} satisfies the requests"),
            ));
        };

        debug!(
            subdevice,
            fourcc = %mode.pixel_format.fourcc,
            width = mode.width,
            height = mode.height,
            fps = mode.fps,
            "mode selected"
        );
        selections.push(ModeSelection::new(mode.clone()));
    }

    Ok(selections)
}

/// Stream whose commits drive frameset assembly
///
/// Among the streams running at the highest frame rate, the first one in
/// `priority` order wins; depth otherwise.
pub fn select_key_stream(selections: &[ModeSelection], priority: &[StreamId]) -> StreamId {
    let mut fps = [0u32; StreamId::COUNT];
    let mut max_fps = 0;
    for selection in selections {
        for stream in selection.streams() {
            fps[stream.index()] = selection.fps();
            max_fps = max_fps.max(selection.fps());
        }
    }

    priority
        .iter()
        .copied()
        .find(|s| fps[s.index()] == max_fps && max_fps > 0)
        .unwrap_or(StreamId::Depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Format, OutputSpec, PixelFormat, Preset, PresetEntry, SubdeviceMapping, Unpacker};

    fn mode(
        subdevice: usize,
        fourcc: &str,
        (width, height, fps): (u32, u32, u32),
        outputs: &[(StreamId, Format)],
        unpacker: Unpacker,
    ) -> HardwareMode {
        HardwareMode {
            subdevice,
            width,
            height,
            pixel_format: PixelFormat::new(fourcc, 2),
            fps,
            outputs: outputs
                .iter()
                .map(|(stream, format)| OutputSpec {
                    stream: *stream,
                    format: *format,
                })
                .collect(),
            unpacker,
        }
    }

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
                    stream: StreamId::Infrared,
                    subdevice: 0,
                },
                SubdeviceMapping {
                    stream: StreamId::Color,
                    subdevice: 1,
                },
            ],
            modes: vec![
                mode(0, "Z16", (640, 480, 30), &[(StreamId::Depth, Format::Z16)], Unpacker::Passthrough),
                mode(0, "Z16", (640, 480, 60), &[(StreamId::Depth, Format::Z16)], Unpacker::Passthrough),
                mode(
                    0,
                    "INZI",
                    (640, 480, 30),
                    &[(StreamId::Depth, Format::Z16), (StreamId::Infrared, Format::Y8)],
                    Unpacker::SplitPlanes,
                ),
                mode(1, "YUY2", (640, 480, 30), &[(StreamId::Color, Format::Rgb8)], Unpacker::YuyvToRgb8),
                mode(1, "YUY2", (1920, 1080, 30), &[(StreamId::Color, Format::Rgb8)], Unpacker::YuyvToRgb8),
            ],
            presets: vec![PresetEntry {
                stream: StreamId::Color,
                preset: Preset::HighestFramerate,
                width: 640,
                height: 480,
                format: Format::Rgb8,
                fps: 90,
            }],
            options: Vec::new(),
            capabilities: Vec::new(),
            num_transfer_buffers: 4,
            depth_scale: 0.001,
            timestamp_reader: Default::default(),
            motion_subdevice: None,
            key_stream_priority: vec![
                StreamId::Color,
                StreamId::Infrared2,
                StreamId::Infrared,
                StreamId::Fisheye,
            ],
        }
    }

    #[test]
    fn test_one_mode_per_subdevice() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable(StreamId::Depth, StreamRequest::new(640, 480, Format::Z16, 30))
            .unwrap();
        config
            .enable(StreamId::Color, StreamRequest::new(640, 480, Format::Rgb8, 30))
            .unwrap();

        let selections = select_modes(&config, &info).unwrap();
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[0].subdevice(), 0);
        assert_eq!(selections[0].mode.pixel_format.fourcc, "Z16");
        assert_eq!(selections[1].subdevice(), 1);
        assert_eq!(selections[1].width(), 640);
    }

    #[test]
    fn test_shared_subdevice_needs_covering_mode() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable(StreamId::Depth, StreamRequest::new(0, 0, Format::Any, 0))
            .unwrap();
        config
            .enable(StreamId::Infrared, StreamRequest::new(0, 0, Format::Y8, 0))
            .unwrap();

        let selections = select_modes(&config, &info).unwrap();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].mode.pixel_format.fourcc, "INZI");
        assert_eq!(
            selections[0].streams().collect::<Vec<_>>(),
            vec![StreamId::Depth, StreamId::Infrared]
        );
    }

    #[test]
    fn test_wildcards_pick_first_mode() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable(StreamId::Depth, StreamRequest::new(0, 0, Format::Any, 60))
            .unwrap();

        let selections = select_modes(&config, &info).unwrap();
        assert_eq!(selections[0].fps(), 60);
    }

    #[test]
    fn test_unsatisfiable_request_lists_streams() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable(StreamId::Color, StreamRequest::new(1280, 720, Format::Rgb8, 30))
            .unwrap();

        let err = select_modes(&config, &info).unwrap_err();
        match err {
            ContractError::UnsupportedStream { stream, .. } => assert_eq!(stream, "color"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_preset_falls_back_to_format() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable_preset(StreamId::Color, Preset::HighestFramerate)
            .unwrap();

        let selections = select_modes(&config, &info).unwrap();
        assert_eq!(selections[0].fps(), 30);
        assert_eq!(selections[0].format(StreamId::Color), Some(Format::Rgb8));
    }

    #[test]
    fn test_explicit_request_does_not_fall_back() {
        let info = info();
        let mut config = StreamConfig::new(info.clone());
        config
            .enable(StreamId::Color, StreamRequest::new(640, 480, Format::Rgb8, 90))
            .unwrap();
        assert!(select_modes(&config, &info).is_err());
    }

    #[test]
    fn test_key_stream_prefers_fastest() {
        let info = info();
        let priority = info.key_stream_priority.clone();

        let depth60 = ModeSelection::new(info.modes[1].clone());
        let color30 = ModeSelection::new(info.modes[3].clone());
        assert_eq!(
            select_key_stream(&[depth60, color30.clone()], &priority),
            StreamId::Depth
        );

        let depth30 = ModeSelection::new(info.modes[0].clone());
        assert_eq!(
            select_key_stream(&[depth30, color30], &priority),
            StreamId::Color
        );

        let inzi = ModeSelection::new(info.modes[2].clone());
        assert_eq!(select_key_stream(&[inzi], &priority), StreamId::Infrared);
        assert_eq!(select_key_stream(&[], &priority), StreamId::Depth);
    }
}
