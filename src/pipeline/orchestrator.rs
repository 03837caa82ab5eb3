//! Transfer orchestration
//!
//! Runs the fixed step sequence against two panel-managed hosts: stop both,
//! compress the world at the source, relay the archive through local
//! staging, extract at the destination, restore player data, restart. Any
//! step failure halts the sequence and triggers best-effort rollback; relay
//! connections are closed regardless of outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{HostConfig, TransferConfig};
use crate::panel::{
    ExtractOutcome, PanelClient, PowerAction, PowerState, RemoteFileClient,
    RemoteProcessController, StateOutcome, StateWait,
};
use crate::relay::{RelayError, RelayTransferClient, RemoteVolume, SftpSession, TransferPhase};

use super::error::{PipelineError, StepError};
use super::tracker::{StepKey, StepStatus, StepTracker, TrackerSnapshot};

/// Staging entries older than this are swept during rollback.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

type ProgressFn<'a> = dyn FnMut(TrackerSnapshot) + Send + 'a;

/// Everything the pipeline needs to talk to one host: panel control plane
/// plus the relay volume.
pub struct HostHandle {
    pub power: RemoteProcessController,
    pub files: RemoteFileClient,
    pub volume: Arc<dyn RemoteVolume>,
}

impl HostHandle {
    /// Build the production handle: one panel client serving both API
    /// surfaces, plus a connected SFTP session.
    pub async fn connect(host: &HostConfig, label: &str) -> Result<Self, RelayError> {
        let client = Arc::new(PanelClient::new(host));
        let session = SftpSession::connect(&host.sftp, label).await?;
        Ok(Self {
            power: RemoteProcessController::new(client.clone(), label),
            files: RemoteFileClient::new(client, label),
            volume: Arc::new(session),
        })
    }
}

/// Per-run state threaded through the steps.
struct TransferContext {
    run_id: Uuid,
    /// Run-private directory under the staging root.
    run_dir: PathBuf,
    /// Player-data backup lives here between backup and restore.
    cache_dir: PathBuf,
    /// Server-assigned archive name, set by the compress step.
    archive: Option<String>,
    playerdata_backed_up: bool,
}

impl TransferContext {
    fn new(config: &TransferConfig) -> Self {
        let run_id = Uuid::new_v4();
        let run_dir = config.staging_dir.join(format!("ferry-{run_id}"));
        let cache_dir = run_dir.join("playerdata");
        Self {
            run_id,
            run_dir,
            cache_dir,
            archive: None,
            playerdata_backed_up: false,
        }
    }
}

/// One world transfer between two hosts. Single-use: construct, `run`, drop.
///
/// Nothing here guards against a second concurrent run on the same hosts;
/// that exclusion belongs to the caller.
pub struct WorldTransfer {
    config: TransferConfig,
    source: HostHandle,
    dest: HostHandle,
    relay: RelayTransferClient,
    stop_wait: StateWait,
    start_wait: StateWait,
    tracker: StepTracker,
}

impl WorldTransfer {
    pub fn new(config: TransferConfig, source: HostHandle, dest: HostHandle) -> Self {
        let relay = RelayTransferClient::new(config.staging_dir.clone());
        Self {
            config,
            source,
            dest,
            relay,
            stop_wait: StateWait::default(),
            start_wait: StateWait::default(),
            tracker: StepTracker::new(),
        }
    }

    /// Validate the config, then connect both hosts.
    pub async fn connect(config: TransferConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let source = HostHandle::connect(&config.source, "source").await?;
        let dest = HostHandle::connect(&config.dest, "dest").await?;
        Ok(Self::new(config, source, dest))
    }

    /// Override the convergence waits. Tests inject millisecond-scale values.
    pub fn with_state_waits(mut self, stop_wait: StateWait, start_wait: StateWait) -> Self {
        self.stop_wait = stop_wait;
        self.start_wait = start_wait;
        self
    }

    /// Current run state, also available after a failed run.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.tracker.snapshot()
    }

    /// Execute the full transfer.
    ///
    /// `on_progress` receives a fresh snapshot after every tracker change.
    /// On failure the error names the failing step; rollback has already run
    /// and both relay connections are closed either way.
    pub async fn run<F>(&mut self, mut on_progress: F) -> Result<TrackerSnapshot, PipelineError>
    where
        F: FnMut(TrackerSnapshot) + Send,
    {
        self.config.validate()?;

        let mut ctx = TransferContext::new(&self.config);
        info!(run_id = %ctx.run_id,
            source = %self.config.source.server_id,
            dest = %self.config.dest.server_id,
            "world transfer starting");

        let result = self.run_steps(&mut ctx, &mut on_progress).await;

        match &result {
            Ok(()) => {
                info!(run_id = %ctx.run_id, "world transfer completed");
                if let Err(e) = tokio::fs::remove_dir_all(&ctx.run_dir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(dir = %ctx.run_dir.display(), error = %e,
                            "could not remove run staging directory");
                    }
                }
            }
            Err(e) => {
                error!(run_id = %ctx.run_id, error = %e, "world transfer failed, rolling back");
                self.rollback(&ctx).await;
            }
        }

        self.close_volumes().await;

        result.map(|()| self.tracker.snapshot())
    }

    async fn run_steps(
        &mut self,
        ctx: &mut TransferContext,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), PipelineError> {
        self.begin(StepKey::Notify, on_progress);
        let result = self.notify_hosts().await;
        self.settle(StepKey::Notify, result, on_progress)?;

        self.begin(StepKey::StopHosts, on_progress);
        let result = self.stop_hosts().await;
        self.settle(StepKey::StopHosts, result, on_progress)?;

        self.begin(StepKey::CompressWorld, on_progress);
        let result = self.compress_world(ctx).await;
        self.settle(StepKey::CompressWorld, result, on_progress)?;

        self.begin(StepKey::BackupPlayerData, on_progress);
        let result = self.backup_player_data(ctx).await;
        self.settle(StepKey::BackupPlayerData, result, on_progress)?;

        self.begin(StepKey::RelayWorld, on_progress);
        let result = self.relay_world(ctx, &mut *on_progress).await;
        self.settle(StepKey::RelayWorld, result, on_progress)?;

        self.begin(StepKey::DeleteOldWorld, on_progress);
        let result = self.delete_old_world().await;
        self.settle(StepKey::DeleteOldWorld, result, on_progress)?;

        self.begin(StepKey::ExtractWorld, on_progress);
        let result = self.extract_world(ctx).await;
        self.settle(StepKey::ExtractWorld, result, on_progress)?;

        self.begin(StepKey::CleanupRemote, on_progress);
        let result = self.cleanup_remote(ctx).await;
        self.settle(StepKey::CleanupRemote, result, on_progress)?;

        self.begin(StepKey::RestorePlayerData, on_progress);
        let result = self.restore_player_data(ctx).await;
        self.settle(StepKey::RestorePlayerData, result, on_progress)?;

        self.begin(StepKey::RestartHosts, on_progress);
        let result = self.restart_hosts().await;
        self.settle(StepKey::RestartHosts, result, on_progress)?;

        Ok(())
    }

    fn begin(&mut self, key: StepKey, on_progress: &mut ProgressFn<'_>) {
        info!(step = %key, "step starting");
        self.tracker.update(key, StepStatus::Running, None, 0);
        on_progress(self.tracker.snapshot());
    }

    fn settle(
        &mut self,
        key: StepKey,
        result: Result<Option<String>, StepError>,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), PipelineError> {
        match result {
            Ok(message) => {
                info!(step = %key, message = message.as_deref().unwrap_or(""), "step completed");
                self.tracker.update(key, StepStatus::Completed, message, 100);
                on_progress(self.tracker.snapshot());
                Ok(())
            }
            Err(source) => {
                error!(step = %key, error = %source, "step failed");
                self.tracker
                    .update(key, StepStatus::Error, Some(source.to_string()), 0);
                on_progress(self.tracker.snapshot());
                Err(PipelineError::Step { step: key, source })
            }
        }
    }

    /// Step 1: console broadcast on both hosts. Never fails the run.
    async fn notify_hosts(&self) -> Result<Option<String>, StepError> {
        let message = &self.config.notify_message;
        let (source, dest) = tokio::join!(
            self.source.power.notify(message),
            self.dest.power.notify(message),
        );
        for (label, result) in [("source", source), ("dest", dest)] {
            if let Err(e) = result {
                warn!(host = label, error = %e, "notification failed");
            }
        }
        Ok(None)
    }

    /// Step 2: stop both hosts and wait for both to go offline.
    async fn stop_hosts(&self) -> Result<Option<String>, StepError> {
        let (source, dest) = tokio::join!(
            self.source.power.set_power_state(PowerAction::Stop),
            self.dest.power.set_power_state(PowerAction::Stop),
        );
        source?;
        dest?;

        let (source, dest) = tokio::join!(
            self.source.power.await_state(PowerState::Offline, &self.stop_wait),
            self.dest.power.await_state(PowerState::Offline, &self.stop_wait),
        );
        if source? == StateOutcome::Assumed || dest? == StateOutcome::Assumed {
            return Ok(Some("offline assumed after wait elapsed".to_string()));
        }
        Ok(None)
    }

    /// Step 3: compress the source world into a server-assigned archive.
    async fn compress_world(&self, ctx: &mut TransferContext) -> Result<Option<String>, StepError> {
        let archive = self
            .source
            .files
            .compress("/", &self.config.source.world_path)
            .await?;
        let message = format!("archive {} ({} bytes)", archive.name, archive.size);
        ctx.archive = Some(archive.name);
        Ok(Some(message))
    }

    /// Step 4: pull the destination's player data into local staging.
    /// A missing directory is a skip, not a failure.
    async fn backup_player_data(
        &self,
        ctx: &mut TransferContext,
    ) -> Result<Option<String>, StepError> {
        let path = &self.config.playerdata_path;
        match self.dest.volume.stat(path).await {
            Err(RelayError::FileNotFound(_)) => {
                warn!(path, "player data directory not found, skipping backup");
                Ok(Some("player data not found, skipping backup".to_string()))
            }
            Err(e) => Err(e.into()),
            Ok(stat) if !stat.is_dir => {
                warn!(path, "player data path is not a directory, skipping backup");
                Ok(Some("player data path is not a directory, skipping backup".to_string()))
            }
            Ok(_) => {
                tokio::fs::create_dir_all(&ctx.run_dir).await?;
                let count = self
                    .relay
                    .directory_download(self.dest.volume.as_ref(), path, &ctx.cache_dir)
                    .await?;
                ctx.playerdata_backed_up = true;
                Ok(Some(format!("{count} files backed up")))
            }
        }
    }

    /// Step 5: relay the archive source → staging → destination, mapping
    /// download to 0-50% and upload to 50-100% of this step.
    async fn relay_world(
        &mut self,
        ctx: &TransferContext,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<Option<String>, StepError> {
        let archive = ctx.archive.clone().ok_or_else(|| {
            StepError::Relay(RelayError::Protocol(
                "no archive recorded before relay".to_string(),
            ))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = self.relay.clone();
        let source = Arc::clone(&self.source.volume);
        let dest = Arc::clone(&self.dest.volume);
        let task_archive = archive.clone();
        let handle = tokio::spawn(async move {
            relay
                .transfer(source, dest, &task_archive, &task_archive, Some(tx))
                .await
        });

        while let Some(event) = rx.recv().await {
            let within = event.percentage.unwrap_or(0.0) / 2.0;
            let step_progress = match event.phase {
                TransferPhase::Download => within,
                TransferPhase::Upload => 50.0 + within,
            } as u8;
            let verb = match event.phase {
                TransferPhase::Download => "downloading",
                TransferPhase::Upload => "uploading",
            };
            let message = format!(
                "{verb} {:.1} MiB/s",
                event.speed_bytes_per_sec as f64 / (1024.0 * 1024.0)
            );
            self.tracker
                .update(StepKey::RelayWorld, StepStatus::Running, Some(message), step_progress);
            on_progress(self.tracker.snapshot());
        }

        let bytes = handle
            .await
            .map_err(|e| StepError::Relay(RelayError::Protocol(format!("relay task aborted: {e}"))))??;
        Ok(Some(format!("{bytes} bytes relayed as {archive}")))
    }

    /// Step 6: delete the destination's old world. Already-absent is fine.
    async fn delete_old_world(&self) -> Result<Option<String>, StepError> {
        match self
            .dest
            .files
            .delete_folder("/", &self.config.dest.world_path)
            .await
        {
            Ok(()) => Ok(None),
            Err(e) if e.is_not_found() => {
                warn!(world = %self.config.dest.world_path, "old world already absent");
                Ok(Some("old world already absent".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Step 7: extract the relayed archive at the destination.
    async fn extract_world(&self, ctx: &TransferContext) -> Result<Option<String>, StepError> {
        let archive = ctx.archive.as_deref().ok_or_else(|| {
            StepError::Relay(RelayError::Protocol(
                "no archive recorded before extraction".to_string(),
            ))
        })?;
        match self.dest.files.decompress("/", archive).await? {
            ExtractOutcome::Confirmed => Ok(None),
            ExtractOutcome::Unconfirmed => {
                Ok(Some("extraction unconfirmed, assuming success".to_string()))
            }
        }
    }

    /// Step 8: remove the archive from both hosts. Already-gone is fine;
    /// both deletes are attempted even if the first fails.
    async fn cleanup_remote(&self, ctx: &TransferContext) -> Result<Option<String>, StepError> {
        let archive = ctx.archive.as_deref().ok_or_else(|| {
            StepError::Relay(RelayError::Protocol(
                "no archive recorded before cleanup".to_string(),
            ))
        })?;

        let mut first_err = None;
        for (label, files) in [("source", &self.source.files), ("dest", &self.dest.files)] {
            match files.delete_file("/", archive).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(host = label, archive, "archive already absent");
                }
                Err(e) => {
                    error!(host = label, archive, error = %e, "archive cleanup failed");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Step 9: push the backed-up player data back to the destination.
    async fn restore_player_data(
        &self,
        ctx: &TransferContext,
    ) -> Result<Option<String>, StepError> {
        if !ctx.playerdata_backed_up {
            return Ok(Some("nothing backed up, skipping restore".to_string()));
        }
        let count = self
            .relay
            .directory_upload(
                self.dest.volume.as_ref(),
                &ctx.cache_dir,
                &self.config.playerdata_path,
            )
            .await?;
        Ok(Some(format!("{count} files restored")))
    }

    /// Step 10: start both hosts and wait for both to come up.
    async fn restart_hosts(&self) -> Result<Option<String>, StepError> {
        let (source, dest) = tokio::join!(
            self.source.power.set_power_state(PowerAction::Start),
            self.dest.power.set_power_state(PowerAction::Start),
        );
        source?;
        dest?;

        let (source, dest) = tokio::join!(
            self.source.power.await_state(PowerState::Running, &self.start_wait),
            self.dest.power.await_state(PowerState::Running, &self.start_wait),
        );
        if source? == StateOutcome::Assumed || dest? == StateOutcome::Assumed {
            return Ok(Some("running assumed after wait elapsed".to_string()));
        }
        Ok(None)
    }

    /// Best-effort rollback. Each sub-action is guarded on its own so one
    /// failure never blocks the rest.
    async fn rollback(&self, ctx: &TransferContext) {
        info!(run_id = %ctx.run_id, "rollback starting");

        if let Err(e) = tokio::fs::remove_dir_all(&ctx.run_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %ctx.run_dir.display(), error = %e,
                    "rollback: could not remove run staging directory");
            }
        }

        if let Some(archive) = ctx.archive.as_deref() {
            for (label, files) in [("source", &self.source.files), ("dest", &self.dest.files)] {
                if let Err(e) = files.delete_file("/", archive).await {
                    if !e.is_not_found() {
                        warn!(host = label, archive, error = %e,
                            "rollback: could not delete archive");
                    }
                }
            }
        }

        for (label, power) in [("source", &self.source.power), ("dest", &self.dest.power)] {
            if let Err(e) = power.set_power_state(PowerAction::Start).await {
                warn!(host = label, error = %e, "rollback: could not start host");
            }
        }

        match sweep_stale_staging(&self.config.staging_dir, STALE_STAGING_AGE) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "rollback: swept stale staging entries"),
            Err(e) => warn!(error = %e, "rollback: staging sweep failed"),
        }
    }

    /// Close both relay connections; one failing never skips the other.
    async fn close_volumes(&self) {
        let (source, dest) = tokio::join!(self.source.volume.close(), self.dest.volume.close());
        for (label, result) in [("source", source), ("dest", dest)] {
            if let Err(e) = result {
                warn!(host = label, error = %e, "closing relay connection failed");
            }
        }
    }
}

/// Remove top-level staging entries older than `max_age`. Returns the
/// number of entries removed; unreadable entries are skipped.
pub fn sweep_stale_staging(dir: &Path, max_age: Duration) -> std::io::Result<u32> {
    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        match result {
            Ok(()) => {
                debug!(path = %entry.path().display(), "swept stale staging entry");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e,
                "could not sweep staging entry"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use crate::config::test_config;
    use crate::panel::{FileOpsApi, PanelError, ProcessApi, RemoteArchive, RemoteEntry};
    use crate::relay::{FileStat, VolumeEntry};
    use crate::relay::{BoxedReader, BoxedWriter};

    const ARCHIVE: &str = "world-archive.tar.gz";

    /// Route any emitted spans/events through the test writer; respects
    /// RUST_LOG when debugging a failing run.
    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn logged(log: &CallLog, line: String) {
        log.lock().unwrap().push(line);
    }

    fn log_contains(log: &CallLog, needle: &str) -> bool {
        log.lock().unwrap().iter().any(|l| l.contains(needle))
    }

    /// Fake panel for one host: power state follows the last power signal,
    /// compress writes a real archive file into `fs_root` so the relay has
    /// something to stream.
    struct FakePanel {
        label: &'static str,
        log: CallLog,
        state: Mutex<PowerState>,
        fs_root: PathBuf,
        fail_compress: bool,
        fail_extract: bool,
        fail_archive_delete: bool,
        world_delete_not_found: bool,
    }

    impl FakePanel {
        fn with(
            label: &'static str,
            log: CallLog,
            fs_root: PathBuf,
            configure: impl FnOnce(&mut Self),
        ) -> Arc<Self> {
            let mut panel = Self {
                label,
                log,
                state: Mutex::new(PowerState::Running),
                fs_root,
                fail_compress: false,
                fail_extract: false,
                fail_archive_delete: false,
                world_delete_not_found: false,
            };
            configure(&mut panel);
            Arc::new(panel)
        }
    }

    #[async_trait]
    impl ProcessApi for FakePanel {
        async fn send_power(&self, action: PowerAction) -> Result<(), PanelError> {
            logged(&self.log, format!("{}.power {}", self.label, action.signal()));
            *self.state.lock().unwrap() = match action {
                PowerAction::Start | PowerAction::Restart => PowerState::Running,
                PowerAction::Stop | PowerAction::Kill => PowerState::Offline,
            };
            Ok(())
        }

        async fn query_state(&self) -> Result<PowerState, PanelError> {
            Ok(*self.state.lock().unwrap())
        }

        async fn send_command(&self, command: &str) -> Result<(), PanelError> {
            logged(&self.log, format!("{}.command {}", self.label, command));
            Ok(())
        }
    }

    #[async_trait]
    impl FileOpsApi for FakePanel {
        async fn compress(
            &self,
            _root: &str,
            paths: &[String],
        ) -> Result<RemoteArchive, PanelError> {
            logged(&self.log, format!("{}.compress {}", self.label, paths[0]));
            if self.fail_compress {
                return Err(PanelError::Rejected {
                    status: 500,
                    message: "archiver crashed".into(),
                });
            }
            let payload = vec![9u8; 4096];
            std::fs::write(self.fs_root.join(ARCHIVE), &payload)
                .map_err(|e| PanelError::Transport(e.to_string()))?;
            Ok(RemoteArchive {
                name: ARCHIVE.to_string(),
                size: payload.len() as u64,
            })
        }

        async fn decompress(&self, _root: &str, file: &str) -> Result<(), PanelError> {
            logged(&self.log, format!("{}.decompress {file}", self.label));
            if self.fail_extract {
                return Err(PanelError::Rejected {
                    status: 422,
                    message: "unsupported archive format".into(),
                });
            }
            Ok(())
        }

        async fn delete(&self, _root: &str, paths: &[String]) -> Result<(), PanelError> {
            logged(&self.log, format!("{}.delete {}", self.label, paths.join(",")));
            if self.fail_archive_delete && paths.iter().any(|p| p.contains(".tar.gz")) {
                return Err(PanelError::Rejected {
                    status: 500,
                    message: "delete failed".into(),
                });
            }
            if self.world_delete_not_found && paths.iter().any(|p| !p.contains(".tar.gz")) {
                return Err(PanelError::Rejected {
                    status: 404,
                    message: "no such directory".into(),
                });
            }
            Ok(())
        }

        async fn list(&self, _dir: &str) -> Result<Vec<RemoteEntry>, PanelError> {
            Ok(vec![])
        }
    }

    /// Fake volume over a local directory, with close accounting.
    struct FakeVolume {
        root: PathBuf,
        close_calls: AtomicU32,
        fail_close: bool,
    }

    impl FakeVolume {
        fn new(root: PathBuf) -> Arc<Self> {
            Arc::new(Self {
                root,
                close_calls: AtomicU32::new(0),
                fail_close: false,
            })
        }

        fn failing_close(root: PathBuf) -> Arc<Self> {
            Arc::new(Self {
                root,
                close_calls: AtomicU32::new(0),
                fail_close: true,
            })
        }

        fn close_count(&self) -> u32 {
            self.close_calls.load(Ordering::SeqCst)
        }

        fn local(&self, path: &str) -> PathBuf {
            self.root.join(path.trim_start_matches('/'))
        }
    }

    #[async_trait]
    impl RemoteVolume for FakeVolume {
        async fn stat(&self, path: &str) -> Result<FileStat, RelayError> {
            let metadata = tokio::fs::metadata(self.local(path))
                .await
                .map_err(|_| RelayError::FileNotFound(path.to_string()))?;
            Ok(FileStat {
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            })
        }

        async fn entries(&self, dir: &str) -> Result<Vec<VolumeEntry>, RelayError> {
            let mut read_dir = tokio::fs::read_dir(self.local(dir)).await?;
            let mut out = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                let name = entry.file_name().to_string_lossy().to_string();
                out.push(VolumeEntry {
                    path: format!("/{}/{}", dir.trim_matches('/'), name),
                    size: metadata.len(),
                    is_dir: metadata.is_dir(),
                    name,
                });
            }
            out.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(out)
        }

        async fn open_read(&self, path: &str) -> Result<BoxedReader, RelayError> {
            let file = tokio::fs::File::open(self.local(path))
                .await
                .map_err(|_| RelayError::FileNotFound(path.to_string()))?;
            Ok(Box::new(file))
        }

        async fn open_write(&self, path: &str) -> Result<BoxedWriter, RelayError> {
            let file = tokio::fs::File::create(self.local(path)).await?;
            Ok(Box::new(file))
        }

        async fn mkdir(&self, path: &str) -> Result<(), RelayError> {
            tokio::fs::create_dir_all(self.local(path)).await?;
            Ok(())
        }

        async fn remove_file(&self, path: &str) -> Result<(), RelayError> {
            tokio::fs::remove_file(self.local(path)).await?;
            Ok(())
        }

        async fn close(&self) -> Result<(), RelayError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(RelayError::Protocol("connection already dropped".to_string()));
            }
            Ok(())
        }
    }

    fn fast_wait() -> StateWait {
        StateWait {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
            assume_after: None,
            offline_error_threshold: 3,
        }
    }

    fn host_handle(panel: Arc<FakePanel>, volume: Arc<FakeVolume>, label: &str) -> HostHandle {
        HostHandle {
            power: RemoteProcessController::new(panel.clone(), label),
            files: RemoteFileClient::new(panel, label),
            volume,
        }
    }

    struct Harness {
        transfer: WorldTransfer,
        log: CallLog,
        source_volume: Arc<FakeVolume>,
        dest_volume: Arc<FakeVolume>,
        _source_dir: tempfile::TempDir,
        dest_dir: tempfile::TempDir,
        staging: tempfile::TempDir,
    }

    fn harness(
        configure_source: impl FnOnce(&mut FakePanel),
        configure_dest: impl FnOnce(&mut FakePanel),
        with_playerdata: bool,
    ) -> Harness {
        let source_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        std::fs::create_dir_all(source_dir.path().join("world")).unwrap();
        std::fs::create_dir_all(dest_dir.path().join("world")).unwrap();
        if with_playerdata {
            let playerdata = dest_dir.path().join("world/playerdata");
            std::fs::create_dir_all(&playerdata).unwrap();
            std::fs::write(playerdata.join("alpha.dat"), b"alpha").unwrap();
        }

        let source_panel =
            FakePanel::with("source", log.clone(), source_dir.path().into(), configure_source);
        let dest_panel =
            FakePanel::with("dest", log.clone(), dest_dir.path().into(), configure_dest);
        let source_volume = FakeVolume::new(source_dir.path().into());
        let dest_volume = FakeVolume::new(dest_dir.path().into());

        let transfer = WorldTransfer::new(
            test_config(staging.path().into()),
            host_handle(source_panel, source_volume.clone(), "source"),
            host_handle(dest_panel, dest_volume.clone(), "dest"),
        )
        .with_state_waits(fast_wait(), fast_wait());

        Harness {
            transfer,
            log,
            source_volume,
            dest_volume,
            _source_dir: source_dir,
            dest_dir,
            staging,
        }
    }

    #[tokio::test]
    async fn happy_path_completes_every_step() {
        init_tracing();
        let mut h = harness(|_| {}, |_| {}, true);

        let mut snapshots = Vec::new();
        let terminal = h
            .transfer
            .run(|snapshot| snapshots.push(snapshot))
            .await
            .unwrap();

        assert_eq!(terminal.overall_progress, 100);
        assert!(!terminal.has_errors);
        assert!(terminal
            .steps
            .iter()
            .all(|r| r.status == StepStatus::Completed));

        // Begin and settle both publish, for every step.
        assert!(snapshots.len() >= 20);
        assert_eq!(snapshots.first().unwrap().current_step, Some(StepKey::Notify));

        // The archive actually crossed: compressed at source, relayed,
        // extracted and deleted at the destination.
        let relayed = std::fs::read(h.dest_dir.path().join(ARCHIVE)).unwrap();
        assert_eq!(relayed.len(), 4096);
        assert!(log_contains(&h.log, "source.compress world"));
        assert!(log_contains(&h.log, &format!("dest.decompress {ARCHIVE}")));
        assert!(log_contains(&h.log, &format!("source.delete {ARCHIVE}")));
        assert!(log_contains(&h.log, &format!("dest.delete {ARCHIVE}")));
        assert!(log_contains(&h.log, "dest.delete world"));
        assert!(log_contains(&h.log, "source.power stop"));
        assert!(log_contains(&h.log, "dest.power start"));

        // Connections closed, run staging removed.
        assert_eq!(h.source_volume.close_count(), 1);
        assert_eq!(h.dest_volume.close_count(), 1);
        let leftovers: Vec<_> = std::fs::read_dir(h.staging.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failure_halts_at_the_failing_step() {
        let mut h = harness(|p| p.fail_compress = true, |_| {}, true);

        let err = h.transfer.run(|_| {}).await.unwrap_err();
        match err {
            PipelineError::Step { step, .. } => assert_eq!(step, StepKey::CompressWorld),
            other => panic!("expected Step error, got {other:?}"),
        }

        let snapshot = h.transfer.snapshot();
        let status_of = |key: StepKey| {
            snapshot
                .steps
                .iter()
                .find(|r| r.key == key)
                .unwrap()
                .status
        };
        assert_eq!(status_of(StepKey::Notify), StepStatus::Completed);
        assert_eq!(status_of(StepKey::StopHosts), StepStatus::Completed);
        assert_eq!(status_of(StepKey::CompressWorld), StepStatus::Error);
        assert_eq!(status_of(StepKey::RelayWorld), StepStatus::Pending);
        assert_eq!(status_of(StepKey::RestartHosts), StepStatus::Pending);
        assert!(snapshot.has_errors);

        // Rollback restarted both hosts; no archive existed to delete.
        assert!(log_contains(&h.log, "source.power start"));
        assert!(log_contains(&h.log, "dest.power start"));
        assert!(!log_contains(&h.log, &format!("delete {ARCHIVE}")));

        // Connections still closed.
        assert_eq!(h.source_volume.close_count(), 1);
        assert_eq!(h.dest_volume.close_count(), 1);
    }

    #[tokio::test]
    async fn rollback_sub_actions_run_despite_individual_failures() {
        init_tracing();
        let source_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        std::fs::create_dir_all(dest_dir.path().join("world/playerdata")).unwrap();
        std::fs::write(
            dest_dir.path().join("world/playerdata/alpha.dat"),
            b"alpha",
        )
        .unwrap();

        // Extraction fails; the source-side archive delete in rollback fails
        // too, and the source connection refuses to close.
        let source_panel = FakePanel::with("source", log.clone(), source_dir.path().into(), |p| {
            p.fail_archive_delete = true;
        });
        let dest_panel = FakePanel::with("dest", log.clone(), dest_dir.path().into(), |p| {
            p.fail_extract = true;
        });
        let source_volume = FakeVolume::failing_close(source_dir.path().into());
        let dest_volume = FakeVolume::new(dest_dir.path().into());

        let mut transfer = WorldTransfer::new(
            test_config(staging.path().into()),
            host_handle(source_panel, source_volume.clone(), "source"),
            host_handle(dest_panel, dest_volume.clone(), "dest"),
        )
        .with_state_waits(fast_wait(), fast_wait());

        let err = transfer.run(|_| {}).await.unwrap_err();
        match err {
            PipelineError::Step { step, .. } => assert_eq!(step, StepKey::ExtractWorld),
            other => panic!("expected Step error, got {other:?}"),
        }

        // Every rollback sub-action was attempted: archive delete on both
        // hosts (source's failed), both hosts started, staging cleared.
        assert!(log_contains(&log, &format!("source.delete {ARCHIVE}")));
        assert!(log_contains(&log, &format!("dest.delete {ARCHIVE}")));
        assert!(log_contains(&log, "source.power start"));
        assert!(log_contains(&log, "dest.power start"));
        let leftovers: Vec<_> = std::fs::read_dir(staging.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());

        // Source close failed, dest was still closed.
        assert_eq!(source_volume.close_count(), 1);
        assert_eq!(dest_volume.close_count(), 1);
    }

    #[tokio::test]
    async fn relay_progress_maps_phases_onto_step_halves() {
        init_tracing();
        let mut h = harness(|_| {}, |_| {}, true);
        // Unthrottled meter so every relayed chunk reaches the drain loop.
        h.transfer.relay =
            RelayTransferClient::new(h.staging.path()).with_progress_interval(Duration::ZERO);

        let mut snapshots = Vec::new();
        h.transfer
            .run(|snapshot| snapshots.push(snapshot))
            .await
            .unwrap();

        let relay_updates: Vec<_> = snapshots
            .iter()
            .filter_map(|s| s.steps.iter().find(|r| r.key == StepKey::RelayWorld))
            .filter(|r| r.status == StepStatus::Running && r.message.is_some())
            .collect();

        let downloads: Vec<_> = relay_updates
            .iter()
            .filter(|r| r.message.as_deref().unwrap().starts_with("downloading"))
            .collect();
        let uploads: Vec<_> = relay_updates
            .iter()
            .filter(|r| r.message.as_deref().unwrap().starts_with("uploading"))
            .collect();

        assert!(!downloads.is_empty());
        assert!(!uploads.is_empty());
        assert!(downloads.iter().all(|r| r.progress <= 50));
        assert!(uploads.iter().all(|r| r.progress >= 50));
    }

    #[tokio::test]
    async fn missing_playerdata_skips_backup_and_restore() {
        let mut h = harness(|_| {}, |p| p.world_delete_not_found = true, false);

        let terminal = h.transfer.run(|_| {}).await.unwrap();
        assert!(terminal
            .steps
            .iter()
            .all(|r| r.status == StepStatus::Completed));

        let backup = terminal
            .steps
            .iter()
            .find(|r| r.key == StepKey::BackupPlayerData)
            .unwrap();
        assert!(backup.message.as_deref().unwrap().contains("skipping backup"));
        let restore = terminal
            .steps
            .iter()
            .find(|r| r.key == StepKey::RestorePlayerData)
            .unwrap();
        assert!(restore.message.as_deref().unwrap().contains("skipping restore"));
    }

    #[tokio::test]
    async fn invalid_config_aborts_before_any_remote_call() {
        let mut h = harness(|_| {}, |_| {}, true);
        h.transfer.config.dest.api_key = String::new();

        let err = h.transfer.run(|_| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        assert!(h.log.lock().unwrap().is_empty());
        assert_eq!(h.source_volume.close_count(), 0);
        assert_eq!(h.dest_volume.close_count(), 0);
    }

    #[test]
    fn sweep_removes_only_old_entries() {
        let staging = tempdir().unwrap();
        std::fs::write(staging.path().join("relay-old.part"), b"x").unwrap();
        std::fs::create_dir(staging.path().join("ferry-old")).unwrap();

        // Everything is younger than a day.
        let removed =
            sweep_stale_staging(staging.path(), Duration::from_secs(24 * 60 * 60)).unwrap();
        assert_eq!(removed, 0);

        // With a zero threshold everything qualifies.
        let removed = sweep_stale_staging(staging.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 2);
        assert!(std::fs::read_dir(staging.path()).unwrap().next().is_none());
    }
}
