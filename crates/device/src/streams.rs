//! Registry of native and derived streams
//!
//! Native streams are bound to the mode selected at `start()`. Derived
//! streams own nothing: their geometry and format are resolved through the
//! native streams they reference.

use contracts::{Format, ModeSelection, StreamId};

/// Geometry of a bound stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMode {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub fps: u32,
}

/// How a stream obtains its images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Native,
    /// Point cloud computed from a depth stream
    Points { depth: StreamId },
    /// `from` reprojected onto the viewpoint of `to`
    Aligned { from: StreamId, to: StreamId },
    /// Undistorted view of a native stream
    Rectified { source: StreamId },
}

impl StreamKind {
    pub fn of(stream: StreamId) -> Self {
        match stream {
            StreamId::Points => StreamKind::Points {
                depth: StreamId::Depth,
            },
            StreamId::RectifiedColor => StreamKind::Rectified {
                source: StreamId::Color,
            },
            StreamId::ColorAlignedToDepth => StreamKind::Aligned {
                from: StreamId::Color,
                to: StreamId::Depth,
            },
            StreamId::DepthAlignedToColor => StreamKind::Aligned {
                from: StreamId::Depth,
                to: StreamId::Color,
            },
            StreamId::DepthAlignedToRectifiedColor => StreamKind::Aligned {
                from: StreamId::Depth,
                to: StreamId::RectifiedColor,
            },
            StreamId::Infrared2AlignedToDepth => StreamKind::Aligned {
                from: StreamId::Infrared2,
                to: StreamId::Depth,
            },
            StreamId::DepthAlignedToInfrared2 => StreamKind::Aligned {
                from: StreamId::Depth,
                to: StreamId::Infrared2,
            },
            _ => StreamKind::Native,
        }
    }

    /// Streams this one is computed from
    pub fn sources(self) -> Vec<StreamId> {
        match self {
            StreamKind::Native => Vec::new(),
            StreamKind::Points { depth } => vec![depth],
            StreamKind::Rectified { source } => vec![source],
            StreamKind::Aligned { from, to } => vec![from, to],
        }
    }
}

/// Per-stream binding to the running capture session
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    bound: [Option<StreamMode>; StreamId::NATIVE_COUNT],
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every enabled output of the selected modes
    pub fn bind(&mut self, selections: &[ModeSelection], enabled: &[StreamId]) {
        self.invalidate();
        for selection in selections {
            for output in &selection.outputs {
                if !enabled.contains(&output.stream) {
                    continue;
                }
                if let Some(slot) = self.bound.get_mut(output.stream.index()) {
                    slot.get_or_insert(StreamMode {
                        width: selection.width(),
                        height: selection.height(),
                        format: output.format,
                        fps: selection.fps(),
                    });
                }
            }
        }
    }

    /// Drop every binding; configuration changes call this
    pub fn invalidate(&mut self) {
        self.bound = [None; StreamId::NATIVE_COUNT];
    }

    pub fn is_bound(&self, stream: StreamId) -> bool {
        self.mode(stream).is_some()
    }

    /// Geometry of `stream`, resolved through its sources for derived streams
    pub fn mode(&self, stream: StreamId) -> Option<StreamMode> {
        match StreamKind::of(stream) {
            StreamKind::Native => self.bound.get(stream.index()).copied().flatten(),
            StreamKind::Points { depth } => self.mode(depth).map(|m| StreamMode {
                format: Format::Xyz32f,
                ..m
            }),
            StreamKind::Rectified { source } => self.mode(source),
            StreamKind::Aligned { from, to } => {
                let from = self.mode(from)?;
                let to = self.mode(to)?;
                Some(StreamMode {
                    format: from.format,
                    ..to
                })
            }
        }
    }
}
