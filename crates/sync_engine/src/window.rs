//! Sync tolerance window.

use contracts::SyncTolerance;

/// Resolved tolerance for one archive instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncWindow {
    /// Half-width in milliseconds, `None` when unbounded
    window_ms: Option<f64>,
}

impl SyncWindow {
    /// Resolve a tolerance policy against the key stream's frame rate
    pub fn new(tolerance: SyncTolerance, key_fps: u32) -> Self {
        Self {
            window_ms: tolerance.window_ms(key_fps),
        }
    }

    pub fn unbounded() -> Self {
        Self { window_ms: None }
    }

    #[inline]
    pub fn window_ms(&self) -> Option<f64> {
        self.window_ms
    }

    /// Whether a frame stamped `frame_ts` may join a frameset keyed at `key_ts`
    #[inline]
    pub fn admits(&self, key_ts: f64, frame_ts: f64) -> bool {
        match self.window_ms {
            None => true,
            Some(w) => (frame_ts - key_ts).abs() <= w,
        }
    }
}
