//! Stream requests, hardware capture modes and mode selections.

use serde::{Deserialize, Serialize};

use crate::{Format, StreamId};

/// User request for one native stream
///
/// `0` dimensions/fps and [`Format::Any`] act as wildcards during mode selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub fps: u32,
}

impl StreamRequest {
    /// Create an enabled request
    pub fn new(width: u32, height: u32, format: Format, fps: u32) -> Self {
        Self {
            enabled: true,
            width,
            height,
            format,
            fps,
        }
    }

    /// Whether this request accepts the given output of a hardware mode
    pub fn is_satisfied_by(&self, mode: &HardwareMode, format: Format) -> bool {
        self.enabled
            && (self.width == 0 || self.width == mode.width)
            && (self.height == 0 || self.height == mode.height)
            && (self.format == Format::Any || self.format == format)
            && (self.fps == 0 || self.fps == mode.fps)
    }
}

/// Native pixel format delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormat {
    /// Four character code, e.g. `"YUY2"` or `"Z16 "`
    pub fourcc: String,
    /// Bytes per native pixel
    pub bytes_per_pixel: usize,
}

impl PixelFormat {
    pub fn new(fourcc: &str, bytes_per_pixel: usize) -> Self {
        Self {
            fourcc: fourcc.to_string(),
            bytes_per_pixel,
        }
    }

    /// Little-endian fourcc code as used by UVC format descriptors
    pub fn code(&self) -> u32 {
        let mut bytes = [b' '; 4];
        for (dst, src) in bytes.iter_mut().zip(self.fourcc.bytes()) {
            *dst = src;
        }
        u32::from_le_bytes(bytes)
    }
}

/// Unpack strategy turning one native buffer into stream outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unpacker {
    /// Native payload is already in the output format (zero-copy capable)
    #[default]
    Passthrough,
    /// Packed YUYV 4:2:2 converted to RGB8
    YuyvToRgb8,
    /// Native payload holds one plane per output, back to back
    SplitPlanes,
}

/// One logical stream produced by a hardware mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSpec {
    pub stream: StreamId,
    pub format: Format,
}

/// Hardware capture mode of one sub-device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareMode {
    /// Physical sub-device (UVC interface) index
    pub subdevice: usize,
    /// Native width
    pub width: u32,
    /// Native height
    pub height: u32,
    /// Native pixel format
    pub pixel_format: PixelFormat,
    /// Frames per second
    pub fps: u32,
    /// Streams produced by this mode
    pub outputs: Vec<OutputSpec>,
    /// Unpack strategy
    #[serde(default)]
    pub unpacker: Unpacker,
}

impl HardwareMode {
    /// Size in bytes of the native image payload (without transport metadata)
    pub fn payload_size(&self) -> usize {
        match self.unpacker {
            Unpacker::SplitPlanes => self
                .outputs
                .iter()
                .map(|o| o.format.frame_size(self.width, self.height))
                .sum(),
            _ => self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel,
        }
    }

    /// Format this mode produces for `stream`, if any
    pub fn output_format(&self, stream: StreamId) -> Option<Format> {
        self.outputs
            .iter()
            .find(|o| o.stream == stream)
            .map(|o| o.format)
    }
}

/// Hardware mode chosen for the current request set
///
/// Computed once per `start()`, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: HardwareMode,
    /// Outputs of `mode` that are delivered to the archive
    pub outputs: Vec<OutputSpec>,
}

impl ModeSelection {
    pub fn new(mode: HardwareMode) -> Self {
        let outputs = mode.outputs.clone();
        Self { mode, outputs }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.mode.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.mode.height
    }

    #[inline]
    pub fn fps(&self) -> u32 {
        self.mode.fps
    }

    #[inline]
    pub fn subdevice(&self) -> usize {
        self.mode.subdevice
    }

    /// Streams served by this selection, in output order
    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.outputs.iter().map(|o| o.stream)
    }

    pub fn format(&self, stream: StreamId) -> Option<Format> {
        self.outputs
            .iter()
            .find(|o| o.stream == stream)
            .map(|o| o.format)
    }

    /// Size of one unpacked output image for `stream`
    pub fn output_frame_size(&self, stream: StreamId) -> usize {
        self.format(stream)
            .map(|f| f.frame_size(self.width(), self.height()))
            .unwrap_or(0)
    }

    /// Row stride in bytes of the unpacked output for `stream`
    pub fn output_stride(&self, stream: StreamId) -> usize {
        self.format(stream)
            .map(|f| self.width() as usize * f.bytes_per_pixel())
            .unwrap_or(0)
    }

    /// Whether frames must be copied/converted before reaching the archive
    ///
    /// Only single-output passthrough modes can hand the transport buffer over as-is.
    pub fn requires_processing(&self) -> bool {
        !(self.outputs.len() == 1 && self.mode.unpacker == Unpacker::Passthrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_ir_mode() -> HardwareMode {
        HardwareMode {
            subdevice: 0,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::new("INZI", 3),
            fps: 30,
            outputs: vec![
                OutputSpec {
                    stream: StreamId::Depth,
                    format: Format::Z16,
                },
                OutputSpec {
                    stream: StreamId::Infrared,
                    format: Format::Y8,
                },
            ],
            unpacker: Unpacker::SplitPlanes,
        }
    }

    #[test]
    fn test_fourcc_code() {
        let pf = PixelFormat::new("YUY2", 2);
        assert_eq!(pf.code(), u32::from_le_bytes(*b"YUY2"));
        assert_eq!(PixelFormat::new("Z16", 2).code(), u32::from_le_bytes(*b"Z16 "));
    }

    #[test]
    fn test_request_wildcards() {
        let mode = depth_ir_mode();
        assert!(StreamRequest::new(0, 0, Format::Any, 0).is_satisfied_by(&mode, Format::Z16));
        assert!(StreamRequest::new(640, 480, Format::Z16, 30).is_satisfied_by(&mode, Format::Z16));
        assert!(!StreamRequest::new(640, 480, Format::Z16, 60).is_satisfied_by(&mode, Format::Z16));
        assert!(!StreamRequest::default().is_satisfied_by(&mode, Format::Z16));
    }

    #[test]
    fn test_split_planes_payload() {
        let mode = depth_ir_mode();
        assert_eq!(mode.payload_size(), 640 * 480 * 3);
        let selection = ModeSelection::new(mode);
        assert!(selection.requires_processing());
        assert_eq!(selection.output_frame_size(StreamId::Infrared), 640 * 480);
    }
}
