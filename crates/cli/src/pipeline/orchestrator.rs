//! Pipeline orchestrator - coordinates device, dispatcher and consumers.
//!
//! Frames come from the paced mock UVC transport, so a run needs no
//! hardware attached.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ContractError, DeviceProfile, Source, StreamId};
use device::Device;
use dispatcher::{ConsumerFlow, DispatcherConfig, FnConsumer, FrameSet, FramesetDispatcher};
use observability::FramesetMetricsAggregator;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use transport::{MockTransportConfig, MockUvcDevice};

use super::PipelineStats;
use crate::error::CliError;

/// How long one wait blocks before shutdown and limits are rechecked
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub profile: DeviceProfile,

    /// Number of consumer threads
    pub consumers: usize,

    /// Maximum number of framesets (None = unlimited)
    pub max_framesets: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Pending framesets per consumer (None = unbounded)
    pub queue_capacity: Option<usize>,

    /// Start motion tracking alongside video
    pub motion: bool,

    /// Mock IMU sample rate
    pub motion_rate_hz: f64,

    /// Corrupt every n-th mock frame
    pub corrupt_every: Option<u64>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to stop the run after the current wait
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Stream until shutdown, a limit, or every consumer has exited
    ///
    /// Blocks the calling thread.
    pub fn run(self) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let profile = &self.config.profile;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let motion = self.config.motion || profile.motion_tracking;
        let transport = Arc::new(MockUvcDevice::with_config(
            profile.device.clone(),
            MockTransportConfig {
                paced: true,
                corrupt_every: self.config.corrupt_every,
                motion_rate_hz: if motion { self.config.motion_rate_hz } else { 0.0 },
                ..Default::default()
            },
        ));
        let device = Device::from_profile(transport.clone(), profile)
            .context("Failed to configure device from profile")?;

        let motion_samples = Arc::new(AtomicU64::new(0));
        let source = if motion {
            device.enable_motion_tracking()?;
            let samples = motion_samples.clone();
            device.set_motion_callback(move |_| {
                samples.fetch_add(1, Ordering::Relaxed);
            })?;
            Source::All
        } else {
            Source::Video
        };

        let expected: Vec<StreamId> = StreamId::NATIVE
            .into_iter()
            .filter(|s| device.is_stream_enabled(*s))
            .collect();
        let aggregator = Arc::new(Mutex::new(FramesetMetricsAggregator::new(expected)));

        let consumers: Vec<_> = (0..self.config.consumers.max(1))
            .map(|i| {
                let aggregator = aggregator.clone();
                FnConsumer::new(format!("consumer-{i}"), move |set: FrameSet| {
                    aggregator.lock().update(set.key_timestamp(), &set.metas());
                    debug!(
                        consumer = i,
                        key_timestamp = set.key_timestamp(),
                        frames = set.len(),
                        "frameset consumed"
                    );
                    Ok(ConsumerFlow::Continue)
                })
            })
            .collect();
        let dispatcher = FramesetDispatcher::spawn(
            consumers,
            DispatcherConfig {
                queue_capacity: self.config.queue_capacity,
            },
        )
        .context("Failed to start consumers")?;

        device.start(source).context("Failed to start device")?;
        info!(
            device = %device.name(),
            key_stream = ?device.key_stream(),
            modes = device.selected_modes().len(),
            consumers = dispatcher.len(),
            max_framesets = ?self.config.max_framesets,
            "Streaming"
        );

        let mut stats = PipelineStats {
            key_stream: device.key_stream(),
            ..Default::default()
        };
        let outcome = self.stream(&device, &dispatcher, start_time, &mut stats);

        info!("Shutting down pipeline...");
        if let Err(e) = device.stop(source) {
            warn!(error = %e, "Error while stopping device");
        }
        stats.consumers = dispatcher.metrics();
        dispatcher.shutdown();

        stats.device = device.metrics();
        stats.starved_transfers = transport.starved_frames();
        stats.motion_samples = motion_samples.load(Ordering::Relaxed);
        stats.summary = aggregator.lock().summary();
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        outcome.context("Pipeline execution failed")?;
        Ok(stats)
    }

    fn stream(
        &self,
        device: &Device,
        dispatcher: &FramesetDispatcher,
        start_time: Instant,
        stats: &mut PipelineStats,
    ) -> Result<(), CliError> {
        let deadline = self.config.timeout.map(|t| start_time + t);

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                info!(framesets = stats.framesets, "Shutdown requested");
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(framesets = stats.framesets, "Run timed out");
                return Ok(());
            }

            match device.wait_for_frames_safe(Some(WAIT_SLICE)) {
                Ok(Some(set)) => {
                    stats.framesets += 1;
                    dispatcher.dispatch(set)?;

                    if stats.framesets % 100 == 0 {
                        debug!(framesets = stats.framesets, "Pipeline progress");
                    }
                    if self
                        .config
                        .max_framesets
                        .is_some_and(|max| stats.framesets >= max)
                    {
                        info!(framesets = stats.framesets, "Reached max framesets limit");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(ContractError::ResourceExhausted { .. }) => {
                    stats.backpressure_events += 1;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
