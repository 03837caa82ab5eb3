//! Two-hop relay transfer
//!
//! Streams a remote file source → local staging file → destination, with
//! throttled progress events carrying instantaneous throughput and ETA.
//! The staging file is removed on every exit path by a drop guard.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::types::{RelayProgress, TransferPhase, VolumeEntry};
use super::volume::RemoteVolume;

/// Chunk size for streaming copies (64 KB).
const CHUNK_SIZE: usize = 64 * 1024;

/// Minimum wall-clock gap between two progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// RAII guard that removes the local staging file on drop.
///
/// Covers every exit path out of [`RelayTransferClient::transfer`]: success,
/// either phase failing, or a panic unwinding through it.
struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staging file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e,
                "failed to remove staging file"),
        }
    }
}

/// Throttles progress emission and computes instantaneous speed/ETA.
///
/// Speed is bytes moved since the previous emitted event divided by the
/// elapsed wall time since that event, not a cumulative average.
struct ProgressMeter {
    interval: Duration,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressMeter {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_emit: now,
            last_bytes: 0,
        }
    }

    /// Returns an event when the rate-limit window has passed, else `None`.
    fn sample_at(
        &mut self,
        now: Instant,
        phase: TransferPhase,
        transferred: u64,
        total: Option<u64>,
    ) -> Option<RelayProgress> {
        let elapsed = now.duration_since(self.last_emit);
        if elapsed < self.interval {
            return None;
        }

        let delta = transferred.saturating_sub(self.last_bytes);
        let speed = if elapsed.as_secs_f64() > 0.0 {
            (delta as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };

        let percentage = total.filter(|t| *t > 0).map(|t| {
            (transferred as f64 / t as f64 * 100.0).min(100.0)
        });
        let eta_seconds = match (total, speed) {
            (Some(t), s) if s > 0 => Some(t.saturating_sub(transferred) / s),
            _ => None,
        };

        self.last_emit = now;
        self.last_bytes = transferred;

        Some(RelayProgress {
            phase,
            bytes_transferred: transferred,
            total_bytes: total,
            percentage,
            speed_bytes_per_sec: speed,
            eta_seconds,
        })
    }

    fn sample(
        &mut self,
        phase: TransferPhase,
        transferred: u64,
        total: Option<u64>,
    ) -> Option<RelayProgress> {
        self.sample_at(Instant::now(), phase, transferred, total)
    }
}

/// Copy `reader` → `writer` in fixed chunks, emitting throttled progress.
///
/// The sender is best-effort: a dropped receiver never aborts the copy.
async fn copy_with_progress<R, W>(
    mut reader: R,
    mut writer: W,
    phase: TransferPhase,
    total: Option<u64>,
    interval: Duration,
    progress_tx: &Option<mpsc::UnboundedSender<RelayProgress>>,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    let mut meter = ProgressMeter::new(interval, Instant::now());

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }

        writer.write_all(&buffer[..bytes_read]).await?;
        transferred += bytes_read as u64;

        if let Some(tx) = progress_tx {
            if let Some(event) = meter.sample(phase, transferred, total) {
                let _ = tx.send(event);
            }
        }
    }

    writer.flush().await?;
    Ok(transferred)
}

/// Two-hop byte relay between two remote volumes via local staging.
#[derive(Clone)]
pub struct RelayTransferClient {
    staging_dir: PathBuf,
    progress_interval: Duration,
}

impl RelayTransferClient {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// Override the progress rate limit. Tests drop it to zero so every
    /// chunk emits an event.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Relay one remote file source → local staging → destination.
    ///
    /// Progress events for both phases go to `progress_tx`; the staging file
    /// is removed whether the transfer succeeds or either phase fails.
    pub async fn transfer(
        &self,
        source: Arc<dyn RemoteVolume>,
        dest: Arc<dyn RemoteVolume>,
        remote_path: &str,
        dest_path: &str,
        progress_tx: Option<mpsc::UnboundedSender<RelayProgress>>,
    ) -> Result<u64, RelayError> {
        // Best-effort size baseline; a failed stat only costs percentages.
        let total = match source.stat(remote_path).await {
            Ok(stat) => Some(stat.size),
            Err(e) => {
                warn!(remote_path, error = %e, "source stat failed, proceeding without size");
                None
            }
        };

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let temp_path = self
            .staging_dir
            .join(format!("relay-{}.part", uuid::Uuid::new_v4()));
        let _guard = TempFileGuard::new(temp_path.clone());

        info!(remote_path, staging = %temp_path.display(), ?total, "relay download starting");
        let downloaded = {
            let reader = source
                .open_read(remote_path)
                .await
                .map_err(|e| e.in_phase(TransferPhase::Download))?;
            let writer = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| RelayError::from(e).in_phase(TransferPhase::Download))?;
            copy_with_progress(
                reader,
                writer,
                TransferPhase::Download,
                total,
                self.progress_interval,
                &progress_tx,
            )
            .await
            .map_err(|e| e.in_phase(TransferPhase::Download))?
        };
        info!(remote_path, bytes = downloaded, "relay download complete");

        info!(dest_path, "relay upload starting");
        let uploaded = {
            let reader = tokio::fs::File::open(&temp_path)
                .await
                .map_err(|e| RelayError::from(e).in_phase(TransferPhase::Upload))?;
            let writer = dest
                .open_write(dest_path)
                .await
                .map_err(|e| e.in_phase(TransferPhase::Upload))?;
            copy_with_progress(
                reader,
                writer,
                TransferPhase::Upload,
                Some(downloaded),
                self.progress_interval,
                &progress_tx,
            )
            .await
            .map_err(|e| e.in_phase(TransferPhase::Upload))?
        };
        info!(dest_path, bytes = uploaded, "relay upload complete");

        Ok(uploaded)
    }

    /// Download a remote directory tree to a local directory, file by file.
    /// Stops at the first failure; returns the number of files copied.
    pub async fn directory_download(
        &self,
        volume: &dyn RemoteVolume,
        remote_dir: &str,
        local_dir: &Path,
    ) -> Result<u64, RelayError> {
        info!(remote_dir, local = %local_dir.display(), "directory download starting");
        tokio::fs::create_dir_all(local_dir).await?;
        let count = download_dir_inner(volume, remote_dir, local_dir).await?;
        info!(remote_dir, files = count, "directory download complete");
        Ok(count)
    }

    /// Upload a local directory tree to a remote directory, file by file.
    /// Stops at the first failure; returns the number of files copied.
    pub async fn directory_upload(
        &self,
        volume: &dyn RemoteVolume,
        local_dir: &Path,
        remote_dir: &str,
    ) -> Result<u64, RelayError> {
        info!(local = %local_dir.display(), remote_dir, "directory upload starting");
        // Ignore mkdir failure: the directory commonly already exists.
        let _ = volume.mkdir(remote_dir).await;
        let count = upload_dir_inner(volume, local_dir, remote_dir).await?;
        info!(remote_dir, files = count, "directory upload complete");
        Ok(count)
    }
}

async fn download_dir_inner(
    volume: &dyn RemoteVolume,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<u64, RelayError> {
    let entries = volume.entries(remote_dir).await?;
    let mut count = 0u64;

    for entry in entries {
        let local_entry = local_dir.join(&entry.name);
        let remote_entry = relative_entry_path(remote_dir, &entry);

        if entry.is_dir {
            tokio::fs::create_dir_all(&local_entry).await?;
            count += Box::pin(download_dir_inner(volume, &remote_entry, &local_entry)).await?;
        } else {
            let reader = volume.open_read(&remote_entry).await?;
            let writer = tokio::fs::File::create(&local_entry).await?;
            copy_with_progress(
                reader,
                writer,
                TransferPhase::Download,
                None,
                PROGRESS_INTERVAL,
                &None,
            )
            .await?;
            count += 1;
        }
    }

    Ok(count)
}

async fn upload_dir_inner(
    volume: &dyn RemoteVolume,
    local_dir: &Path,
    remote_dir: &str,
) -> Result<u64, RelayError> {
    let mut entries = tokio::fs::read_dir(local_dir).await?;
    let mut count = 0u64;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let remote_entry = format!("{}/{}", remote_dir.trim_end_matches('/'), name);
        let metadata = entry.metadata().await?;

        if metadata.is_dir() {
            let _ = volume.mkdir(&remote_entry).await;
            count += Box::pin(upload_dir_inner(volume, &entry.path(), &remote_entry)).await?;
        } else {
            let reader = tokio::fs::File::open(entry.path()).await?;
            let writer = volume.open_write(&remote_entry).await?;
            copy_with_progress(
                reader,
                writer,
                TransferPhase::Upload,
                None,
                PROGRESS_INTERVAL,
                &None,
            )
            .await?;
            count += 1;
        }
    }

    Ok(count)
}

/// Volume paths are root-relative, but `entries` returns root-absolute
/// paths. Walk with dir-relative joins so recursion stays root-relative.
fn relative_entry_path(remote_dir: &str, entry: &VolumeEntry) -> String {
    if remote_dir.is_empty() || remote_dir == "/" {
        entry.name.clone()
    } else {
        format!("{}/{}", remote_dir.trim_end_matches('/'), entry.name)
    }
}
