//! Frame metadata and the per-buffer metadata trailer layout

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Format, StreamId};

/// Timing information of one captured frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Device clock, milliseconds
    pub timestamp: f64,
    pub frame_counter: u64,
    /// Arrival wall-clock time, milliseconds since the Unix epoch
    pub system_time: f64,
}

/// Metadata of a committed frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub stream: StreamId,
    pub timestamp: f64,
    pub frame_counter: u64,
    pub system_time: f64,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// Row stride in bytes
    pub stride: usize,
}

impl FrameMeta {
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            timestamp: self.timestamp,
            frame_counter: self.frame_counter,
            system_time: self.system_time,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn system_time_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Metadata trailer appended by the firmware to every video transport buffer
///
/// All fields are little-endian on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameTrailer {
    pub magic: u32,
    /// Device clock in microseconds, wraps at `u32::MAX`
    pub timestamp_ticks: u32,
    pub frame_counter: u32,
}

impl FrameTrailer {
    pub const MAGIC: u32 = 0x4453_594E;
    pub const SIZE: usize = std::mem::size_of::<FrameTrailer>();

    pub fn new(timestamp_ticks: u32, frame_counter: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            timestamp_ticks,
            frame_counter,
        }
    }

    /// Wire representation
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let le = FrameTrailer {
            magic: self.magic.to_le(),
            timestamp_ticks: self.timestamp_ticks.to_le(),
            frame_counter: self.frame_counter.to_le(),
        };
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&le));
        out
    }

    /// Read the trailer from the end of `buffer`
    ///
    /// Returns `None` when the buffer is too short or the magic does not match.
    pub fn decode(buffer: &[u8]) -> Option<Self> {
        let start = buffer.len().checked_sub(Self::SIZE)?;
        let raw: FrameTrailer = bytemuck::try_pod_read_unaligned(&buffer[start..]).ok()?;
        let trailer = FrameTrailer {
            magic: u32::from_le(raw.magic),
            timestamp_ticks: u32::from_le(raw.timestamp_ticks),
            frame_counter: u32::from_le(raw.frame_counter),
        };
        (trailer.magic == Self::MAGIC).then_some(trailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_at_buffer_end() {
        let mut buf = vec![7u8; 32];
        buf.extend_from_slice(&FrameTrailer::new(33_333, 12).encode());
        let t = FrameTrailer::decode(&buf).unwrap();
        assert_eq!(t.timestamp_ticks, 33_333);
        assert_eq!(t.frame_counter, 12);
    }

    #[test]
    fn test_trailer_rejects_bad_input() {
        assert!(FrameTrailer::decode(&[0u8; 4]).is_none());
        assert!(FrameTrailer::decode(&[0u8; 64]).is_none());
    }

    #[test]
    fn test_system_time_is_positive() {
        assert!(system_time_ms() > 0.0);
    }
}
