//! Motion module data-channel parsing

use contracts::{MotionData, MotionPacket, PacketKind, TimestampData};
use tracing::trace;

/// Events decoded from one data-channel transfer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionEventBatch {
    pub imu: Vec<MotionData>,
    pub timestamps: Vec<TimestampData>,
}

impl MotionEventBatch {
    pub fn is_empty(&self) -> bool {
        self.imu.is_empty() && self.timestamps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.imu.len() + self.timestamps.len()
    }
}

/// Turns raw data-channel bytes into motion events
pub trait MotionParser: Send {
    fn parse(&mut self, data: &[u8]) -> Vec<MotionEventBatch>;
}

/// Parser for the fixed-size little-endian [`MotionPacket`] layout
///
/// Bytes of a trailing partial packet are kept and completed by the next
/// transfer. Packets with an unknown kind are skipped.
#[derive(Debug, Default)]
pub struct PacketMotionParser {
    pending: Vec<u8>,
    skipped: u64,
}

impl PacketMotionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets skipped because of an unknown kind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn decode_into(&mut self, chunk: &[u8], batch: &mut MotionEventBatch) {
        let Some(packet) = MotionPacket::decode(chunk) else {
            return;
        };
        match PacketKind::from_raw(packet.kind) {
            Some(PacketKind::Imu) => batch.imu.push(MotionData {
                timestamp: packet.timestamp_data(),
                is_valid: packet.axes.iter().all(|a| a.is_finite()),
                axes: packet.axes,
            }),
            Some(PacketKind::Timestamp) => batch.timestamps.push(packet.timestamp_data()),
            None => {
                self.skipped += 1;
                trace!(kind = packet.kind, "skipping unknown motion packet");
            }
        }
    }
}

impl MotionParser for PacketMotionParser {
    fn parse(&mut self, data: &[u8]) -> Vec<MotionEventBatch> {
        let mut batch = MotionEventBatch::default();
        let mut input = data;

        if !self.pending.is_empty() {
            let need = MotionPacket::SIZE - self.pending.len();
            let take = need.min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < MotionPacket::SIZE {
                return Vec::new();
            }
            let chunk = std::mem::take(&mut self.pending);
            self.decode_into(&chunk, &mut batch);
        }

        let mut chunks = input.chunks_exact(MotionPacket::SIZE);
        for chunk in chunks.by_ref() {
            self.decode_into(chunk, &mut batch);
        }
        self.pending.extend_from_slice(chunks.remainder());

        if batch.is_empty() {
            Vec::new()
        } else {
            vec![batch]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::EventSource;

    #[test]
    fn test_parse_mixed_packets() {
        let bytes = MotionPacket::encode_batch(&[
            MotionPacket::imu(EventSource::Accel, 1_000, 1, [0.0, 0.0, 9.81]),
            MotionPacket::timestamp(EventSource::Video, 1_500, 2),
            MotionPacket::imu(EventSource::Gyro, 2_000, 3, [0.1, 0.0, 0.0]),
        ]);

        let mut parser = PacketMotionParser::new();
        let batches = parser.parse(&bytes);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].imu.len(), 2);
        assert_eq!(batches[0].timestamps.len(), 1);
        assert_eq!(batches[0].imu[0].timestamp.source, EventSource::Accel);
        assert!(batches[0].imu[0].is_valid);
        assert_eq!(batches[0].timestamps[0].timestamp, 1.5);
    }

    #[test]
    fn test_partial_packet_is_completed_later() {
        let bytes = MotionPacket::encode_batch(&[MotionPacket::imu(
            EventSource::Gyro,
            5_000,
            9,
            [1.0, 2.0, 3.0],
        )]);
        let (head, tail) = bytes.split_at(10);

        let mut parser = PacketMotionParser::new();
        assert!(parser.parse(head).is_empty());
        let batches = parser.parse(tail);
        assert_eq!(batches[0].imu[0].axes, [1.0, 2.0, 3.0]);
        assert_eq!(batches[0].imu[0].timestamp.frame_number, 9);
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let mut packet = MotionPacket::timestamp(EventSource::Motion, 0, 0);
        packet.kind = 77;
        let bytes = MotionPacket::encode_batch(&[packet]);

        let mut parser = PacketMotionParser::new();
        assert!(parser.parse(&bytes).is_empty());
        assert_eq!(parser.skipped(), 1);
    }
}
