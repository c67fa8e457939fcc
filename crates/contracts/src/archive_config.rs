//! Synchronizing archive configuration

use serde::{Deserialize, Serialize};

/// Maximum timestamp distance between a key-stream frame and the frames
/// snapshotted alongside it
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncTolerance {
    /// Always take the latest frame of every stream
    #[default]
    Unbounded,
    /// Absolute window in device-clock milliseconds
    Millis(f64),
    /// Multiple of the key stream's frame period
    FramePeriods(f64),
}

impl SyncTolerance {
    /// Resolve to a window in milliseconds for a key stream running at `key_fps`
    ///
    /// Returns `None` for unbounded tolerance.
    pub fn window_ms(&self, key_fps: u32) -> Option<f64> {
        match *self {
            SyncTolerance::Unbounded => None,
            SyncTolerance::Millis(ms) => Some(ms.max(0.0)),
            SyncTolerance::FramePeriods(periods) => {
                if key_fps == 0 {
                    None
                } else {
                    Some(periods.max(0.0) * 1000.0 / key_fps as f64)
                }
            }
        }
    }
}

/// Capacities and policy of one archive instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Framesets retained for waiters before the oldest is evicted
    pub history_depth: usize,
    /// Frame slots per stream pool
    pub slots_per_stream: usize,
    /// Externally held frameset handles
    pub max_published_framesets: usize,
    /// Externally held single-frame handles
    pub max_detached_refs: usize,
    pub tolerance: SyncTolerance,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            history_depth: 16,
            slots_per_stream: 64,
            max_published_framesets: 64,
            max_detached_refs: 128,
            tolerance: SyncTolerance::Unbounded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_window() {
        assert_eq!(SyncTolerance::Unbounded.window_ms(30), None);
        assert_eq!(SyncTolerance::Millis(5.0).window_ms(30), Some(5.0));
        let w = SyncTolerance::FramePeriods(1.5).window_ms(30).unwrap();
        assert!((w - 50.0).abs() < 1e-9);
        assert_eq!(SyncTolerance::FramePeriods(1.0).window_ms(0), None);
    }

    #[test]
    fn test_archive_config_partial_deserialize() {
        let cfg: ArchiveConfig = serde_json::from_str(r#"{"history_depth": 4}"#).unwrap();
        assert_eq!(cfg.history_depth, 4);
        assert_eq!(cfg.slots_per_stream, 64);
        assert_eq!(cfg.tolerance, SyncTolerance::Unbounded);

        let cfg: ArchiveConfig =
            toml::from_str("tolerance = { kind = \"millis\", value = 8.0 }").unwrap();
        assert_eq!(cfg.tolerance, SyncTolerance::Millis(8.0));
    }
}
