//! # Integration Tests
//!
//! End-to-end tests across crates, driven by the mock UVC transport.
//!
//! Covers:
//! - device -> archive -> dispatcher data flow
//! - reference counting of shared frames and transport buffers
//! - shutdown paths (flush, queue clear, consumer exit)
//! - motion data alongside video

#[cfg(test)]
mod support {
    use std::path::Path;
    use std::sync::Arc;

    use contracts::DeviceProfile;
    use device::Device;
    use transport::{MockTransportConfig, MockUvcDevice};

    pub const DEPTH: usize = 0;
    pub const COLOR: usize = 1;
    pub const PERIOD_US: u32 = 33_333;

    pub fn profile() -> DeviceProfile {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/mock_d4.toml");
        let mut profile = config_loader::ConfigLoader::load_from_path(&path).unwrap();
        profile.device.num_transfer_buffers = 32;
        profile
    }

    pub fn device_with(config: MockTransportConfig) -> (Arc<MockUvcDevice>, Device) {
        let profile = profile();
        let mock = Arc::new(MockUvcDevice::with_config(profile.device.clone(), config));
        let device = Device::from_profile(mock.clone(), &profile).unwrap();
        (mock, device)
    }

    pub fn open_device() -> (Arc<MockUvcDevice>, Device) {
        device_with(MockTransportConfig::default())
    }

    pub fn deliver_pair(mock: &MockUvcDevice, index: u32) {
        assert!(mock.deliver_frame(DEPTH, index * PERIOD_US).unwrap());
        assert!(mock.deliver_frame(COLOR, index * PERIOD_US).unwrap());
    }

    pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if done() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        done()
    }
}

#[cfg(test)]
mod contract_tests {
    use contracts::{FrameTrailer, StreamId};

    #[test]
    fn test_stream_table() {
        assert_eq!(StreamId::NATIVE.len(), StreamId::NATIVE_COUNT);
        assert!(StreamId::NATIVE.iter().all(|s| s.is_native()));
        assert!(!StreamId::Points.is_native());
        assert_eq!("depth".parse::<StreamId>().unwrap(), StreamId::Depth);
    }

    #[test]
    fn test_mock_profile_loads() {
        let profile = super::support::profile();
        assert_eq!(profile.device.subdevice_of(StreamId::Color), Some(1));
        assert_eq!(profile.streams.len(), 2);
        assert!(FrameTrailer::SIZE > 0);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use contracts::{ContractError, Source, StreamId};
    use dispatcher::{
        ConsumerFlow, DispatcherConfig, DispatcherError, FnConsumer, FrameSet, FramesetDispatcher,
        SingleConsumerQueue,
    };
    use observability::FramesetMetricsAggregator;
    use parking_lot::Mutex;
    use transport::MockTransportConfig;

    use crate::support::{deliver_pair, device_with, open_device, wait_until, PERIOD_US};

    fn drain(device: &device::Device) -> Vec<FrameSet> {
        let mut sets = Vec::new();
        while let Some(set) = device
            .wait_for_frames_safe(Some(Duration::from_millis(10)))
            .unwrap()
        {
            sets.push(set);
        }
        sets
    }

    /// MockUvcDevice -> Device -> FramesetDispatcher -> consumer threads
    #[test]
    fn test_e2e_mock_pipeline() {
        let (mock, device) = open_device();

        let seen: Arc<Mutex<HashMap<usize, Vec<u64>>>> = Arc::default();
        let aggregator = Arc::new(Mutex::new(FramesetMetricsAggregator::new(vec![
            StreamId::Depth,
            StreamId::Color,
        ])));
        let consumers: Vec<_> = (0..2)
            .map(|i| {
                let seen = seen.clone();
                let aggregator = aggregator.clone();
                FnConsumer::new(format!("consumer-{i}"), move |set: FrameSet| {
                    aggregator.lock().update(set.key_timestamp(), &set.metas());
                    let counter = set
                        .frame(StreamId::Color)
                        .map(|f| f.frame_counter())
                        .unwrap_or_default();
                    seen.lock().entry(i).or_default().push(counter);
                    Ok(ConsumerFlow::Continue)
                })
            })
            .collect();
        let dispatcher = FramesetDispatcher::spawn(consumers, DispatcherConfig::default()).unwrap();

        device.start(Source::Video).unwrap();
        for i in 1..=10 {
            deliver_pair(&mock, i);
        }
        for set in drain(&device) {
            dispatcher.dispatch(set).unwrap();
        }

        assert!(wait_until(|| {
            dispatcher.metrics().iter().map(|(_, m)| m.delivered).sum::<u64>() == 10
        }));
        let metrics = dispatcher.metrics();
        dispatcher.shutdown();
        device.stop(Source::Video).unwrap();

        // Round-robin: even spread, each consumer sees increasing counters
        assert_eq!(metrics[0].1.delivered, 5);
        assert_eq!(metrics[1].1.delivered, 5);
        let seen = seen.lock();
        for counters in seen.values() {
            assert_eq!(counters.len(), 5);
            assert!(counters.windows(2).all(|w| w[0] < w[1]));
        }

        let summary = aggregator.lock().summary();
        assert_eq!(summary.total_framesets, 10);
        assert_eq!(summary.incomplete_framesets, 0);

        // Every transport buffer handed back exactly once
        assert_eq!(mock.outstanding_buffers(), 0);
        assert_eq!(mock.released_buffers(), mock.delivered_frames());
    }

    #[test]
    fn test_frameset_clones_share_frames() {
        let (mock, device) = open_device();
        device.start(Source::Video).unwrap();
        deliver_pair(&mock, 1);

        let set = device
            .wait_for_frames_safe(Some(Duration::from_millis(50)))
            .unwrap()
            .unwrap();
        let clones: Vec<FrameSet> = (0..3).map(|_| device.clone_frames(&set).unwrap()).collect();
        assert_eq!(device.archive_stats().unwrap().published_framesets, 4);

        let depth = device.detach_frame(&set, StreamId::Depth).unwrap();
        device.release_frames(set);
        for clone in clones {
            assert_eq!(clone.frame(StreamId::Depth).unwrap().frame_counter(), 1);
            device.release_frames(clone);
        }
        assert_eq!(device.archive_stats().unwrap().published_framesets, 0);

        // The detached reference keeps the depth buffer alive past stop
        device.stop(Source::Video).unwrap();
        assert_eq!(depth.frame_counter(), 1);
        assert_eq!(mock.outstanding_buffers(), 1);
        device.release_frame(depth);
        assert_eq!(mock.outstanding_buffers(), 0);
    }

    #[test]
    fn test_published_capacity_applies_backpressure() {
        let mut profile = crate::support::profile();
        profile.archive.max_published_framesets = 2;
        let mock = Arc::new(transport::MockUvcDevice::new(profile.device.clone()));
        let device = device::Device::from_profile(mock.clone(), &profile).unwrap();

        device.start(Source::Video).unwrap();
        for i in 1..=3 {
            deliver_pair(&mock, i);
        }

        let first = device.poll_for_frames_safe().unwrap().unwrap();
        let _second = device.poll_for_frames_safe().unwrap().unwrap();
        assert!(matches!(
            device.poll_for_frames_safe(),
            Err(ContractError::ResourceExhausted { .. })
        ));

        // Releasing one handle makes the pending frameset available again
        drop(first);
        let third = device.poll_for_frames_safe().unwrap().unwrap();
        assert!((third.key_timestamp() - 3.0 * PERIOD_US as f64 / 1000.0).abs() < 1e-9);
        drop(third);
        device.stop(Source::Video).unwrap();
    }

    #[test]
    fn test_stop_releases_blocked_waiter() {
        let (_mock, device) = open_device();
        let device = Arc::new(device);
        device.start(Source::Video).unwrap();

        let waiter = {
            let device = device.clone();
            thread::spawn(move || device.wait_for_frames_safe(None))
        };
        thread::sleep(Duration::from_millis(50));
        device.stop(Source::Video).unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Ok(None)));
        assert!(!device.wait_for_frames(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_corrupt_frames_are_released_not_committed() {
        let (mock, device) = open_device();
        device.start(Source::Video).unwrap();

        deliver_pair(&mock, 1);
        assert!(mock.deliver_corrupt_frame(crate::support::DEPTH).unwrap());
        deliver_pair(&mock, 2);

        let sets = drain(&device);
        assert_eq!(sets.len(), 2);
        drop(sets);
        device.stop(Source::Video).unwrap();

        let metrics = device.metrics();
        assert_eq!(metrics.frames_received, 5);
        assert_eq!(metrics.frames_invalid, 1);
        assert_eq!(metrics.frames_committed, 4);
        assert_eq!(mock.released_buffers(), 5);
        assert_eq!(mock.outstanding_buffers(), 0);
    }

    #[test]
    fn test_consumer_exit_reroutes_framesets() {
        let (mock, device) = open_device();
        let quitter = FnConsumer::new("quitter", |_set: FrameSet| Ok(ConsumerFlow::Exit));
        let counted = Arc::new(AtomicU64::new(0));
        let worker = {
            let counted = counted.clone();
            FnConsumer::new("worker", move |_set: FrameSet| {
                counted.fetch_add(1, Ordering::Relaxed);
                Ok(ConsumerFlow::Continue)
            })
        };
        let consumers: Vec<Box<dyn dispatcher::FrameConsumer>> =
            vec![Box::new(quitter), Box::new(worker)];
        let dispatcher = FramesetDispatcher::spawn(consumers, DispatcherConfig::default()).unwrap();

        device.start(Source::Video).unwrap();
        deliver_pair(&mock, 1);
        let first = device.poll_for_frames_safe().unwrap().unwrap();
        assert_eq!(dispatcher.dispatch(first).unwrap(), 0);
        assert!(wait_until(|| dispatcher.running() == 1));

        for i in 2..=5 {
            deliver_pair(&mock, i);
        }
        for set in drain(&device) {
            assert_eq!(dispatcher.dispatch(set).unwrap(), 1);
        }
        assert!(wait_until(|| counted.load(Ordering::Relaxed) == 4));

        dispatcher.shutdown();
        device.stop(Source::Video).unwrap();
        assert_eq!(mock.outstanding_buffers(), 0);
    }

    #[test]
    fn test_no_consumers_left() {
        let (mock, device) = open_device();
        let dispatcher = FramesetDispatcher::spawn(
            vec![FnConsumer::new("once", |_set: FrameSet| Ok(ConsumerFlow::Exit))],
            DispatcherConfig::default(),
        )
        .unwrap();

        device.start(Source::Video).unwrap();
        deliver_pair(&mock, 1);
        deliver_pair(&mock, 2);
        let mut sets = drain(&device).into_iter();
        dispatcher.dispatch(sets.next().unwrap()).unwrap();
        assert!(wait_until(|| dispatcher.running() == 0));
        assert!(matches!(
            dispatcher.dispatch(sets.next().unwrap()),
            Err(DispatcherError::NoConsumers)
        ));

        dispatcher.shutdown();
        device.stop(Source::Video).unwrap();
        assert_eq!(mock.outstanding_buffers(), 0);
    }

    #[test]
    fn test_queue_clear_discards_pending() {
        let queue = SingleConsumerQueue::new();
        for i in 1..=3 {
            assert!(queue.enqueue(i));
        }
        assert_eq!(queue.dequeue(), Some(1));

        queue.clear();
        assert!(queue.is_cleared());
        assert_eq!(queue.dequeue(), None);
        assert!(!queue.enqueue(4));
    }

    #[test]
    fn test_unmapped_stream_is_rejected() {
        let (_mock, device) = open_device();
        let err = device
            .enable_stream(StreamId::Points, 640, 480, contracts::Format::Xyz32f, 30)
            .unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedStream { .. }));
        assert!(device.is_stream_enabled(StreamId::Depth));
    }

    #[test]
    fn test_paced_motion_alongside_video() {
        let (mock, device) = device_with(MockTransportConfig {
            paced: true,
            motion_rate_hz: 500.0,
            ..Default::default()
        });
        let samples = Arc::new(AtomicU64::new(0));
        {
            let samples = samples.clone();
            device.enable_motion_tracking().unwrap();
            device
                .set_motion_callback(move |_| {
                    samples.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        device.start(Source::All).unwrap();
        assert!(mock.is_acquiring());
        let set = device
            .wait_for_frames_safe(Some(Duration::from_secs(2)))
            .unwrap()
            .unwrap();
        assert!(set.contains(StreamId::Color));
        drop(set);
        assert!(wait_until(|| samples.load(Ordering::Relaxed) > 0));

        device.stop(Source::All).unwrap();
        assert!(!mock.is_acquiring());
        assert!(!mock.is_streaming());
    }

    /// Paced capture consumed from an async task
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_consumer_over_paced_capture() {
        let (_mock, device) = device_with(MockTransportConfig {
            paced: true,
            ..Default::default()
        });
        let device = Arc::new(device);
        device.start(Source::Video).unwrap();

        let reader = {
            let device = device.clone();
            tokio::task::spawn_blocking(move || {
                let mut timestamps = Vec::new();
                while timestamps.len() < 5 {
                    match device.wait_for_frames_safe(Some(Duration::from_millis(500))) {
                        Ok(Some(set)) => timestamps.push(set.key_timestamp()),
                        Ok(None) => break,
                        Err(e) => panic!("wait failed: {e}"),
                    }
                }
                timestamps
            })
        };

        let timestamps = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        device.stop(Source::Video).unwrap();

        assert_eq!(timestamps.len(), 5);
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    }
}
