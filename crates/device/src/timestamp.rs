//! Frame timestamp readers
//!
//! A reader validates each transport buffer and extracts the device
//! timestamp and frame counter from it. One reader instance serves every
//! sub-device of a capture session; state is kept per sub-device.

use std::collections::HashMap;

use contracts::{FrameTrailer, HardwareMode, TimestampReaderKind};
use parking_lot::Mutex;

/// Extracts timing information from raw transport buffers
///
/// `validate_frame` is called exactly once per delivered buffer, before the
/// two getters.
pub trait FrameTimestampReader: Send + Sync {
    /// Whether the buffer looks complete and uncorrupted
    fn validate_frame(&self, mode: &HardwareMode, frame: &[u8]) -> bool;

    /// Device clock timestamp in milliseconds
    fn get_frame_timestamp(&self, mode: &HardwareMode, frame: &[u8]) -> f64;

    /// Frame counter, strictly increasing per sub-device
    fn get_frame_counter(&self, mode: &HardwareMode, frame: &[u8]) -> u64;
}

/// Reader matching the device's declared timestamp source
pub fn create_timestamp_reader(kind: TimestampReaderKind) -> Box<dyn FrameTimestampReader> {
    match kind {
        TimestampReaderKind::Metadata => Box::new(MetadataTimestampReader::new()),
        TimestampReaderKind::Serial => Box::new(SerialTimestampReader::new()),
    }
}

/// Extends a wrapping 32-bit hardware counter to 64 bits
#[derive(Debug, Default, Clone, Copy)]
struct Unwrapper {
    last: Option<u32>,
    wraps: u64,
}

impl Unwrapper {
    fn unwrap(&mut self, value: u32) -> u64 {
        if let Some(last) = self.last {
            // A large backwards jump is a rollover, a small one is reordering
            if value < last && last - value > u32::MAX / 2 {
                self.wraps += 1;
            }
        }
        self.last = Some(value);
        (self.wraps << 32) | value as u64
    }
}

#[derive(Debug, Default)]
struct MetadataState {
    timestamp: Unwrapper,
    counter: Unwrapper,
}

/// Reads the metadata trailer appended to every buffer
///
/// A buffer is valid when it holds the mode's full payload followed by a
/// trailer carrying the expected magic.
#[derive(Debug, Default)]
pub struct MetadataTimestampReader {
    state: Mutex<HashMap<usize, MetadataState>>,
}

impl MetadataTimestampReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameTimestampReader for MetadataTimestampReader {
    fn validate_frame(&self, mode: &HardwareMode, frame: &[u8]) -> bool {
        frame.len() >= mode.payload_size() + FrameTrailer::SIZE
            && FrameTrailer::decode(frame).is_some()
    }

    fn get_frame_timestamp(&self, mode: &HardwareMode, frame: &[u8]) -> f64 {
        let Some(trailer) = FrameTrailer::decode(frame) else {
            return 0.0;
        };
        let mut state = self.state.lock();
        let ticks = state
            .entry(mode.subdevice)
            .or_default()
            .timestamp
            .unwrap(trailer.timestamp_ticks);
        ticks as f64 / 1000.0
    }

    fn get_frame_counter(&self, mode: &HardwareMode, frame: &[u8]) -> u64 {
        let Some(trailer) = FrameTrailer::decode(frame) else {
            return 0;
        };
        let mut state = self.state.lock();
        state
            .entry(mode.subdevice)
            .or_default()
            .counter
            .unwrap(trailer.frame_counter)
    }
}

/// Synthesizes timing from arrival order
///
/// For transports without per-frame metadata: the n-th valid buffer of a
/// sub-device gets counter `n` and timestamp `n` frame periods.
#[derive(Debug, Default)]
pub struct SerialTimestampReader {
    counters: Mutex<HashMap<usize, u64>>,
}

impl SerialTimestampReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self, subdevice: usize) -> u64 {
        self.counters.lock().get(&subdevice).copied().unwrap_or(0)
    }
}

impl FrameTimestampReader for SerialTimestampReader {
    fn validate_frame(&self, mode: &HardwareMode, frame: &[u8]) -> bool {
        if frame.len() < mode.payload_size() {
            return false;
        }
        *self.counters.lock().entry(mode.subdevice).or_insert(0) += 1;
        true
    }

    fn get_frame_timestamp(&self, mode: &HardwareMode, _frame: &[u8]) -> f64 {
        let period_ms = 1000.0 / mode.fps.max(1) as f64;
        self.current(mode.subdevice) as f64 * period_ms
    }

    fn get_frame_counter(&self, mode: &HardwareMode, _frame: &[u8]) -> u64 {
        self.current(mode.subdevice)
    }
}
