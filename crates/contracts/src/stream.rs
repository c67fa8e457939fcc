//! Stream identifiers, pixel formats, presets and capture sources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Logical stream identifier
///
/// The first [`StreamId::NATIVE_COUNT`] variants are produced by hardware;
/// the rest are derived from them (aligned / rectified views).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Depth,
    Color,
    Infrared,
    Infrared2,
    Fisheye,
    Points,
    RectifiedColor,
    ColorAlignedToDepth,
    DepthAlignedToColor,
    DepthAlignedToRectifiedColor,
    Infrared2AlignedToDepth,
    DepthAlignedToInfrared2,
}

impl StreamId {
    /// Number of hardware-produced streams
    pub const NATIVE_COUNT: usize = 5;

    /// Total number of stream identifiers
    pub const COUNT: usize = 12;

    /// Hardware-produced streams, in index order
    pub const NATIVE: [StreamId; Self::NATIVE_COUNT] = [
        StreamId::Depth,
        StreamId::Color,
        StreamId::Infrared,
        StreamId::Infrared2,
        StreamId::Fisheye,
    ];

    /// Every stream identifier, in index order
    pub const ALL: [StreamId; Self::COUNT] = [
        StreamId::Depth,
        StreamId::Color,
        StreamId::Infrared,
        StreamId::Infrared2,
        StreamId::Fisheye,
        StreamId::Points,
        StreamId::RectifiedColor,
        StreamId::ColorAlignedToDepth,
        StreamId::DepthAlignedToColor,
        StreamId::DepthAlignedToRectifiedColor,
        StreamId::Infrared2AlignedToDepth,
        StreamId::DepthAlignedToInfrared2,
    ];

    /// Dense index usable for fixed-size tables
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lookup by dense index
    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Whether the stream is produced directly by hardware
    #[inline]
    pub fn is_native(self) -> bool {
        self.index() < Self::NATIVE_COUNT
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamId::Depth => "depth",
            StreamId::Color => "color",
            StreamId::Infrared => "infrared",
            StreamId::Infrared2 => "infrared2",
            StreamId::Fisheye => "fisheye",
            StreamId::Points => "points",
            StreamId::RectifiedColor => "rectified_color",
            StreamId::ColorAlignedToDepth => "color_aligned_to_depth",
            StreamId::DepthAlignedToColor => "depth_aligned_to_color",
            StreamId::DepthAlignedToRectifiedColor => "depth_aligned_to_rectified_color",
            StreamId::Infrared2AlignedToDepth => "infrared2_aligned_to_depth",
            StreamId::DepthAlignedToInfrared2 => "depth_aligned_to_infrared2",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamId {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ContractError::unsupported_stream(s, "unknown stream name"))
    }
}

/// Pixel format of a stream output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Wildcard, matches any format during mode selection
    #[default]
    Any,
    Z16,
    Disparity16,
    Xyz32f,
    Yuyv,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Y8,
    Y16,
    Raw10,
    Raw16,
    Raw8,
}

impl Format {
    /// Size in bytes of one `width` x `height` image in this format
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Format::Any => 0,
            Format::Raw10 => pixels * 5 / 4,
            other => pixels * other.bytes_per_pixel(),
        }
    }

    /// Whole bytes per pixel (Raw10 reports 2, use [`Format::frame_size`] for exact sizes)
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Format::Any => 0,
            Format::Y8 | Format::Raw8 => 1,
            Format::Z16
            | Format::Disparity16
            | Format::Yuyv
            | Format::Y16
            | Format::Raw10
            | Format::Raw16 => 2,
            Format::Rgb8 | Format::Bgr8 => 3,
            Format::Rgba8 | Format::Bgra8 => 4,
            Format::Xyz32f => 12,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Named stream presets declared by the capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    BestQuality,
    LargestImage,
    HighestFramerate,
}

/// Acquisition source selector for `start` / `stop`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Video streams only
    #[default]
    Video,
    /// Motion module data channel only
    MotionTracking,
    /// Both video and motion tracking
    All,
}

impl Source {
    #[inline]
    pub fn includes_video(self) -> bool {
        matches!(self, Source::Video | Source::All)
    }

    #[inline]
    pub fn includes_motion(self) -> bool {
        matches!(self, Source::MotionTracking | Source::All)
    }
}
