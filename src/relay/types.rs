//! Relay data types

use serde::{Deserialize, Serialize};

/// Which hop of the relay a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    Download,
    Upload,
}

/// One throttled progress event from a running transfer.
///
/// `speed_bytes_per_sec` is instantaneous: bytes moved since the previous
/// event divided by the time since the previous event, not a cumulative
/// average. `eta_seconds` is `None` while speed is zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayProgress {
    pub phase: TransferPhase,
    pub bytes_transferred: u64,
    /// Total size if the source stat succeeded.
    pub total_bytes: Option<u64>,
    pub percentage: Option<f64>,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
}

/// Stat result for a remote file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// One entry from a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub name: String,
    /// Full remote path.
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}
