//! Motion module data types and the data-channel packet layout

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Origin of a motion-module event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Accel,
    Gyro,
    Video,
    Motion,
    Unknown,
}

impl EventSource {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => EventSource::Accel,
            2 => EventSource::Gyro,
            3 => EventSource::Video,
            4 => EventSource::Motion,
            _ => EventSource::Unknown,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            EventSource::Accel => 1,
            EventSource::Gyro => 2,
            EventSource::Video => 3,
            EventSource::Motion => 4,
            EventSource::Unknown => 0,
        }
    }
}

/// Timestamp event emitted by the motion module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampData {
    /// Device clock, milliseconds
    pub timestamp: f64,
    pub source: EventSource,
    pub frame_number: u32,
}

/// IMU sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionData {
    pub timestamp: TimestampData,
    pub is_valid: bool,
    /// Accelerometer in m/s², gyroscope in rad/s
    pub axes: [f32; 3],
}

pub type MotionCallback = Arc<dyn Fn(MotionData) + Send + Sync>;
pub type TimestampCallback = Arc<dyn Fn(TimestampData) + Send + Sync>;

/// Kind tag of a data-channel packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Imu,
    Timestamp,
}

impl PacketKind {
    pub const IMU: u32 = 1;
    pub const TIMESTAMP: u32 = 2;

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::IMU => Some(PacketKind::Imu),
            Self::TIMESTAMP => Some(PacketKind::Timestamp),
            _ => None,
        }
    }
}

/// Fixed-size little-endian record of the motion data channel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MotionPacket {
    pub kind: u32,
    pub source: u32,
    /// Device clock in microseconds
    pub timestamp_ticks: u32,
    pub frame_number: u32,
    /// Zero for timestamp packets
    pub axes: [f32; 3],
}

impl MotionPacket {
    pub const SIZE: usize = std::mem::size_of::<MotionPacket>();

    pub fn imu(source: EventSource, timestamp_ticks: u32, frame_number: u32, axes: [f32; 3]) -> Self {
        Self {
            kind: PacketKind::IMU,
            source: source.to_raw(),
            timestamp_ticks,
            frame_number,
            axes,
        }
    }

    pub fn timestamp(source: EventSource, timestamp_ticks: u32, frame_number: u32) -> Self {
        Self {
            kind: PacketKind::TIMESTAMP,
            source: source.to_raw(),
            timestamp_ticks,
            frame_number,
            axes: [0.0; 3],
        }
    }

    /// Serialize a batch of packets for the data channel
    pub fn encode_batch(packets: &[MotionPacket]) -> Vec<u8> {
        let mut out = Vec::with_capacity(packets.len() * Self::SIZE);
        for p in packets {
            let le = MotionPacket {
                kind: p.kind.to_le(),
                source: p.source.to_le(),
                timestamp_ticks: p.timestamp_ticks.to_le(),
                frame_number: p.frame_number.to_le(),
                axes: p.axes.map(|a| f32::from_bits(a.to_bits().to_le())),
            };
            out.extend_from_slice(bytemuck::bytes_of(&le));
        }
        out
    }

    /// Read one packet from exactly [`MotionPacket::SIZE`] bytes
    pub fn decode(chunk: &[u8]) -> Option<Self> {
        let raw: MotionPacket = bytemuck::try_pod_read_unaligned(chunk).ok()?;
        Some(MotionPacket {
            kind: u32::from_le(raw.kind),
            source: u32::from_le(raw.source),
            timestamp_ticks: u32::from_le(raw.timestamp_ticks),
            frame_number: u32::from_le(raw.frame_number),
            axes: raw.axes.map(|a| f32::from_bits(u32::from_le(a.to_bits()))),
        })
    }

    pub fn timestamp_data(&self) -> TimestampData {
        TimestampData {
            timestamp: self.timestamp_ticks as f64 / 1000.0,
            source: EventSource::from_raw(self.source),
            frame_number: self.frame_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        assert_eq!(MotionPacket::SIZE, 28);
        let bytes = MotionPacket::encode_batch(&[
            MotionPacket::imu(EventSource::Gyro, 2_000, 5, [0.1, 0.2, 0.3]),
            MotionPacket::timestamp(EventSource::Video, 3_000, 6),
        ]);
        assert_eq!(bytes.len(), 2 * MotionPacket::SIZE);

        let first = MotionPacket::decode(&bytes[..MotionPacket::SIZE]).unwrap();
        assert_eq!(PacketKind::from_raw(first.kind), Some(PacketKind::Imu));
        assert_eq!(first.timestamp_data().source, EventSource::Gyro);
        assert_eq!(first.timestamp_data().timestamp, 2.0);
        assert_eq!(first.axes, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_decode_rejects_short_chunk() {
        assert!(MotionPacket::decode(&[0u8; 10]).is_none());
    }
}
