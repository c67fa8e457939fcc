//! Run statistics.

use std::time::Duration;

use contracts::StreamId;
use device::DeviceMetricsSnapshot;
use dispatcher::MetricsSnapshot;
use observability::MetricsSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Framesets taken from the device
    pub framesets: u64,

    /// Waits rejected because consumers held too many framesets
    pub backpressure_events: u64,

    /// Total duration of the run
    pub duration: Duration,

    pub key_stream: Option<StreamId>,

    /// Transport callback counters
    pub device: DeviceMetricsSnapshot,

    /// Mock transfers skipped because every buffer was held
    pub starved_transfers: u64,

    /// IMU samples delivered to the motion callback
    pub motion_samples: u64,

    /// Per-consumer counters
    pub consumers: Vec<(String, MetricsSnapshot)>,

    /// Frameset content statistics
    pub summary: MetricsSummary,
}

impl PipelineStats {
    /// Framesets per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.framesets as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of received transport buffers that never reached the archive
    pub fn loss_rate(&self) -> f64 {
        let lost = self.device.frames_invalid + self.device.frames_dropped;
        if self.device.frames_received > 0 {
            lost as f64 / self.device.frames_received as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Framesets: {}", self.framesets);
        println!("   ├─ FPS: {:.2}", self.fps());
        match self.key_stream {
            Some(stream) => println!("   ├─ Key stream: {}", stream),
            None => println!("   ├─ Key stream: -"),
        }
        println!("   └─ Backpressure events: {}", self.backpressure_events);

        println!("\nDevice");
        println!("   ├─ Buffers received: {}", self.device.frames_received);
        println!("   ├─ Invalid: {}", self.device.frames_invalid);
        println!("   ├─ No slot: {}", self.device.frames_dropped);
        println!("   ├─ Committed: {}", self.device.frames_committed);
        println!("   ├─ Loss rate: {:.2}%", self.loss_rate());
        println!("   ├─ Starved transfers: {}", self.starved_transfers);
        println!("   └─ Motion samples: {}", self.motion_samples);

        if !self.consumers.is_empty() {
            println!("\nConsumers ({})", self.consumers.len());
            for (i, (name, m)) in self.consumers.iter().enumerate() {
                let prefix = if i + 1 == self.consumers.len() { "└─" } else { "├─" };
                println!(
                    "   {} {}: delivered={}, failed={}, dropped={}",
                    prefix, name, m.delivered, m.failed, m.dropped
                );
            }
        }

        println!("\n{}", self.summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let stats = PipelineStats {
            framesets: 60,
            duration: Duration::from_secs(2),
            device: DeviceMetricsSnapshot {
                frames_received: 200,
                frames_invalid: 5,
                frames_dropped: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!((stats.fps() - 30.0).abs() < 1e-9);
        assert!((stats.loss_rate() - 5.0).abs() < 1e-9);
        assert_eq!(PipelineStats::default().fps(), 0.0);
    }
}
