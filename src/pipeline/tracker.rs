//! Step progress model
//!
//! One mutable tracker owned by the running orchestrator; everyone else sees
//! immutable snapshots published through the progress callback. Steps are
//! addressed by name, never by position, and the step set is fixed for the
//! lifetime of a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The fixed transfer steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    Notify,
    StopHosts,
    CompressWorld,
    BackupPlayerData,
    RelayWorld,
    DeleteOldWorld,
    ExtractWorld,
    CleanupRemote,
    RestorePlayerData,
    RestartHosts,
}

impl StepKey {
    pub const ALL: [StepKey; 10] = [
        StepKey::Notify,
        StepKey::StopHosts,
        StepKey::CompressWorld,
        StepKey::BackupPlayerData,
        StepKey::RelayWorld,
        StepKey::DeleteOldWorld,
        StepKey::ExtractWorld,
        StepKey::CleanupRemote,
        StepKey::RestorePlayerData,
        StepKey::RestartHosts,
    ];

    /// Human-readable label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            StepKey::Notify => "Notifying players",
            StepKey::StopHosts => "Stopping both servers",
            StepKey::CompressWorld => "Compressing world on source",
            StepKey::BackupPlayerData => "Backing up player data",
            StepKey::RelayWorld => "Transferring world archive",
            StepKey::DeleteOldWorld => "Removing old world on destination",
            StepKey::ExtractWorld => "Extracting world on destination",
            StepKey::CleanupRemote => "Cleaning up archives",
            StepKey::RestorePlayerData => "Restoring player data",
            StepKey::RestartHosts => "Restarting both servers",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StepKey::Notify => "notify",
            StepKey::StopHosts => "stop_hosts",
            StepKey::CompressWorld => "compress_world",
            StepKey::BackupPlayerData => "backup_player_data",
            StepKey::RelayWorld => "relay_world",
            StepKey::DeleteOldWorld => "delete_old_world",
            StepKey::ExtractWorld => "extract_world",
            StepKey::CleanupRemote => "cleanup_remote",
            StepKey::RestorePlayerData => "restore_player_data",
            StepKey::RestartHosts => "restart_hosts",
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// State of one step at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub key: StepKey,
    pub label: &'static str,
    pub status: StepStatus,
    /// Latest detail line (error text, skip reason, throughput).
    pub message: Option<String>,
    /// 0-100 within this step.
    pub progress: u8,
    pub last_updated: DateTime<Utc>,
}

/// Immutable view of the whole run, safe to hand to callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub steps: Vec<StepRecord>,
    pub overall_progress: u8,
    pub current_step: Option<StepKey>,
    pub has_errors: bool,
    pub generated_at: DateTime<Utc>,
}

/// Mutable step registry for a single run.
pub struct StepTracker {
    steps: Vec<StepRecord>,
}

impl StepTracker {
    /// All steps pending.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            steps: StepKey::ALL
                .iter()
                .map(|&key| StepRecord {
                    key,
                    label: key.label(),
                    status: StepStatus::Pending,
                    message: None,
                    progress: 0,
                    last_updated: now,
                })
                .collect(),
        }
    }

    /// Update one step in place.
    pub fn update(
        &mut self,
        key: StepKey,
        status: StepStatus,
        message: Option<String>,
        progress: u8,
    ) {
        // Every StepKey is seeded in new(), so the lookup always hits.
        if let Some(record) = self.steps.iter_mut().find(|r| r.key == key) {
            record.status = status;
            record.message = message;
            record.progress = progress.min(100);
            record.last_updated = Utc::now();
        }
    }

    /// Completed steps count in full, the running step by its own progress.
    pub fn overall_progress(&self) -> u8 {
        let total = self.steps.len() as f64;
        let mut done = 0.0;
        for record in &self.steps {
            match record.status {
                StepStatus::Completed => done += 1.0,
                StepStatus::Running => done += record.progress as f64 / 100.0,
                _ => {}
            }
        }
        (done / total * 100.0).round() as u8
    }

    /// The step currently running, if any. The orchestrator keeps this
    /// unique by settling each step before starting the next.
    pub fn current_running(&self) -> Option<StepKey> {
        self.steps
            .iter()
            .find(|r| r.status == StepStatus::Running)
            .map(|r| r.key)
    }

    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|r| r.status == StepStatus::Error)
    }

    pub fn is_completed(&self) -> bool {
        self.steps.iter().all(|r| r.status == StepStatus::Completed)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            steps: self.steps.clone(),
            overall_progress: self.overall_progress(),
            current_step: self.current_running(),
            has_errors: self.has_errors(),
            generated_at: Utc::now(),
        }
    }
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}
