//! Frame acquisition metrics
//!
//! Facade helpers called by the archive, the device controller and the
//! dispatcher, plus an in-memory aggregator for run summaries.

use std::collections::HashMap;

use contracts::{FrameMeta, StreamId};
use metrics::{counter, gauge, histogram};

/// A frame was committed to the archive
pub fn record_frame_committed(stream: StreamId) {
    counter!(
        "depthsync_frames_committed_total",
        "stream" => stream.as_str()
    )
    .increment(1);
}

/// A frame was discarded before or at commit
///
/// `reason` is one of `invalid`, `out_of_order`, `pool_exhausted`, `flushed`.
pub fn record_frame_dropped(stream: StreamId, reason: &'static str) {
    counter!(
        "depthsync_frames_dropped_total",
        "stream" => stream.as_str(),
        "reason" => reason
    )
    .increment(1);
}

/// A frameset was assembled on a key-stream commit
///
/// `skew_ms` is the spread between the oldest and newest frame of the set.
pub fn record_frameset_published(skew_ms: f64) {
    counter!("depthsync_framesets_published_total").increment(1);
    histogram!("depthsync_frameset_skew_ms").record(skew_ms);
}

/// A hardware buffer was handed back to the transport
pub fn record_continuation_fired() {
    counter!("depthsync_continuations_fired_total").increment(1);
}

/// A frameset was delivered to a consumer
pub fn record_frameset_dispatched(consumer: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "depthsync_framesets_dispatched_total",
        "consumer" => consumer.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Occupied slots of one stream pool
pub fn record_pool_occupancy(stream: StreamId, live_slots: usize) {
    gauge!(
        "depthsync_pool_live_slots",
        "stream" => stream.as_str()
    )
    .set(live_slots as f64);
}

/// Motion-module packets forwarded to user callbacks
pub fn record_motion_packets(imu: usize, timestamps: usize) {
    counter!("depthsync_motion_packets_total", "kind" => "imu").increment(imu as u64);
    counter!("depthsync_motion_packets_total", "kind" => "timestamp")
        .increment(timestamps as u64);
}

/// Spread between oldest and newest timestamp of a set of frames
pub fn frameset_skew_ms(frames: &[FrameMeta]) -> f64 {
    let mut iter = frames.iter().map(|f| f.timestamp);
    let Some(first) = iter.next() else {
        return 0.0;
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    max - min
}

/// Frameset statistics aggregator
///
/// Aggregates in memory for the end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct FramesetMetricsAggregator {
    /// Streams every frameset is expected to carry
    pub expected_streams: Vec<StreamId>,

    pub total_framesets: u64,

    /// Framesets lacking at least one expected stream
    pub incomplete_framesets: u64,

    /// Timestamp spread inside each frameset (ms)
    pub skew_stats: RunningStats,

    /// Distance between consecutive key timestamps (ms)
    pub interval_stats: RunningStats,

    pub stream_counts: HashMap<StreamId, u64>,

    pub missing_counts: HashMap<StreamId, u64>,

    last_key_timestamp: Option<f64>,
}

impl FramesetMetricsAggregator {
    pub fn new(expected_streams: Vec<StreamId>) -> Self {
        Self {
            expected_streams,
            ..Self::default()
        }
    }

    /// Account one frameset given the metadata of its frames
    pub fn update(&mut self, key_timestamp: f64, frames: &[FrameMeta]) {
        self.total_framesets += 1;
        self.skew_stats.push(frameset_skew_ms(frames));

        if let Some(last) = self.last_key_timestamp {
            self.interval_stats.push(key_timestamp - last);
        }
        self.last_key_timestamp = Some(key_timestamp);

        for frame in frames {
            *self.stream_counts.entry(frame.stream).or_insert(0) += 1;
        }

        let mut incomplete = false;
        for expected in &self.expected_streams {
            if !frames.iter().any(|f| f.stream == *expected) {
                incomplete = true;
                *self.missing_counts.entry(*expected).or_insert(0) += 1;
            }
        }
        if incomplete {
            self.incomplete_framesets += 1;
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_framesets: self.total_framesets,
            incomplete_framesets: self.incomplete_framesets,
            incomplete_rate: if self.total_framesets > 0 {
                self.incomplete_framesets as f64 / self.total_framesets as f64 * 100.0
            } else {
                0.0
            },
            skew_ms: StatsSummary::from(&self.skew_stats),
            interval_ms: StatsSummary::from(&self.interval_stats),
            stream_counts: self.stream_counts.clone(),
            missing_counts: self.missing_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.expected_streams));
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_framesets: u64,
    pub incomplete_framesets: u64,
    pub incomplete_rate: f64,
    pub skew_ms: StatsSummary,
    pub interval_ms: StatsSummary,
    pub stream_counts: HashMap<StreamId, u64>,
    pub missing_counts: HashMap<StreamId, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Frameset Summary ===")?;
        writeln!(f, "Total framesets: {}", self.total_framesets)?;
        writeln!(
            f,
            "Incomplete framesets: {} ({:.2}%)",
            self.incomplete_framesets, self.incomplete_rate
        )?;
        writeln!(f, "Skew (ms): {}", self.skew_ms)?;
        writeln!(f, "Key interval (ms): {}", self.interval_ms)?;

        let mut streams: Vec<_> = self.stream_counts.iter().collect();
        streams.sort();
        if !streams.is_empty() {
            writeln!(f, "Frames per stream:")?;
            for (stream, count) in streams {
                writeln!(f, "  {}: {}", stream, count)?;
            }
        }

        let mut missing: Vec<_> = self.missing_counts.iter().collect();
        missing.sort();
        if !missing.is_empty() {
            writeln!(f, "Missing stream counts:")?;
            for (stream, count) in missing {
                writeln!(f, "  {}: {}", stream, count)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Format;

    fn meta(stream: StreamId, timestamp: f64) -> FrameMeta {
        FrameMeta {
            stream,
            timestamp,
            frame_counter: 1,
            system_time: 0.0,
            width: 640,
            height: 480,
            format: Format::Z16,
            stride: 1280,
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_skew() {
        assert_eq!(frameset_skew_ms(&[]), 0.0);
        let frames = [meta(StreamId::Color, 100.0), meta(StreamId::Depth, 96.5)];
        assert!((frameset_skew_ms(&frames) - 3.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator =
            FramesetMetricsAggregator::new(vec![StreamId::Color, StreamId::Depth]);

        aggregator.update(100.0, &[meta(StreamId::Color, 100.0), meta(StreamId::Depth, 99.0)]);
        aggregator.update(133.0, &[meta(StreamId::Color, 133.0)]);

        assert_eq!(aggregator.total_framesets, 2);
        assert_eq!(aggregator.incomplete_framesets, 1);
        assert_eq!(aggregator.missing_counts.get(&StreamId::Depth), Some(&1));
        assert_eq!(aggregator.stream_counts.get(&StreamId::Color), Some(&2));
        assert!((aggregator.interval_stats.mean() - 33.0).abs() < 1e-10);

        let summary = aggregator.summary();
        assert!((summary.incomplete_rate - 50.0).abs() < 1e-10);

        aggregator.reset();
        assert_eq!(aggregator.total_framesets, 0);
        assert_eq!(aggregator.expected_streams.len(), 2);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = FramesetMetricsAggregator::new(vec![StreamId::Depth]);
        aggregator.update(0.0, &[meta(StreamId::Depth, 0.0)]);
        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Total framesets: 1"));
        assert!(output.contains("0.00%"));
        assert!(output.contains("depth: 1"));
    }
}
