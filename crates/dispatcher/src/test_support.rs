use contracts::{
    ArchiveConfig, Format, FrameInfo, HardwareMode, ModeSelection, OutputSpec, PixelFormat,
    StreamId, SyncTolerance, Unpacker,
};
use sync_engine::{FrameSet, SynchronizingArchive};

/// `count` depth-only framesets with increasing counters
pub(crate) fn framesets(count: usize) -> Vec<FrameSet> {
    let mode = HardwareMode {
        subdevice: 0,
        width: 2,
        height: 2,
        pixel_format: PixelFormat::new("Z16", 2),
        fps: 30,
        outputs: vec![OutputSpec {
            stream: StreamId::Depth,
            format: Format::Z16,
        }],
        unpacker: Unpacker::Passthrough,
    };
    let config = ArchiveConfig {
        history_depth: count.max(1),
        slots_per_stream: count + 2,
        max_published_framesets: count + 1,
        max_detached_refs: 8,
        tolerance: SyncTolerance::Unbounded,
    };
    let archive = SynchronizingArchive::new(&[ModeSelection::new(mode)], StreamId::Depth, config);

    for i in 0..count {
        let info = FrameInfo {
            timestamp: i as f64 * 33.0,
            frame_counter: i as u64 + 1,
            system_time: 0.0,
        };
        let buffer = archive.alloc_frame(StreamId::Depth, info, true).unwrap();
        assert!(archive.commit_frame(buffer).unwrap());
    }
    (0..count)
        .map(|_| archive.poll_for_frames_safe().unwrap().unwrap())
        .collect()
}
