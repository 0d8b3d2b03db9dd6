use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 13887;

/// Tunable values for a replication session. How these are loaded is the
/// host's concern; this is a plain value struct with usable defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application/protocol identifier. Carried in the transport handshake;
    /// peers built against a different identifier are rejected before any
    /// message decoding happens.
    pub app_id: String,
    pub port: u16,
    /// Transport pump rate, updates per second.
    pub net_rate: u32,
    /// Per-body snapshot broadcast rate, snapshots per second.
    pub snapshot_rate: u32,
    /// Interpolation keyframe cache depth, clamped to >= 2.
    pub cache_depth: usize,
    pub timeout_secs: f32,
    pub heartbeat_interval_ms: u64,
    /// Positional deviation (world units) between an echoed authoritative
    /// sample and the local simulation before a desync is reported.
    pub desync_position_tolerance: f32,
    /// Angular deviation (radians) before a desync is reported.
    pub desync_angle_tolerance: f32,
    /// Snap the local body onto the authoritative sample when a desync is
    /// detected. Off by default: detection-only.
    pub snap_on_desync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_id: "kinsync".to_owned(),
            port: DEFAULT_PORT,
            net_rate: 60,
            snapshot_rate: 20,
            cache_depth: 2,
            timeout_secs: 10.0,
            heartbeat_interval_ms: 2000,
            desync_position_tolerance: 1.0,
            desync_angle_tolerance: 0.05,
            snap_on_desync: false,
        }
    }
}

impl SyncConfig {
    pub fn cache_depth(&self) -> usize {
        self.cache_depth.max(crate::body::MIN_CACHE_DEPTH)
    }

    /// Milliseconds between snapshot broadcasts for one owned body.
    pub fn snapshot_interval_ms(&self) -> i64 {
        (1000 / self.snapshot_rate.max(1)) as i64
    }
}
