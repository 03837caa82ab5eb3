//! Remote file operations
//!
//! Compress, extract, delete, and list against one host's managed
//! filesystem. The extraction endpoint returns no completion payload and
//! its HTTP call can time out client-side while the server keeps
//! extracting, so completion is inferred from directory listings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::error::PanelError;
use super::types::{RemoteArchive, RemoteEntry};

/// File-operations surface of the panel API.
#[async_trait]
pub trait FileOpsApi: Send + Sync {
    /// Compress `paths` (relative to `root`) into a server-assigned archive.
    async fn compress(&self, root: &str, paths: &[String]) -> Result<RemoteArchive, PanelError>;

    /// Extract `file` (relative to `root`) in place. No completion payload.
    async fn decompress(&self, root: &str, file: &str) -> Result<(), PanelError>;

    async fn delete(&self, root: &str, paths: &[String]) -> Result<(), PanelError>;

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, PanelError>;
}

/// How an extraction finished.
///
/// `Unconfirmed` is the polling give-up: no error, but nothing ever
/// confirmed the extraction either. Callers currently treat both as
/// success; logs keep them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    Confirmed,
    Unconfirmed,
}

/// Polling parameters for [`RemoteFileClient::decompress`].
///
/// Production values bound the total wait to a multi-hour ceiling; tests
/// inject millisecond-scale values.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            max_polls: 36,
        }
    }
}

/// Compress/extract/delete/list client for one managed host.
#[derive(Clone)]
pub struct RemoteFileClient {
    api: Arc<dyn FileOpsApi>,
    label: String,
    poll: PollSettings,
}

impl RemoteFileClient {
    pub fn new(api: Arc<dyn FileOpsApi>, label: impl Into<String>) -> Self {
        Self::with_poll_settings(api, label, PollSettings::default())
    }

    pub fn with_poll_settings(
        api: Arc<dyn FileOpsApi>,
        label: impl Into<String>,
        poll: PollSettings,
    ) -> Self {
        Self {
            api,
            label: label.into(),
            poll,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Compress `folder` under `root` into a server-assigned archive.
    ///
    /// The returned name is time-unique on the server. Failures come back as
    /// [`PanelError::Compression`]; the wrapped source keeps the
    /// client-timeout vs remote-rejection distinction.
    pub async fn compress(&self, root: &str, folder: &str) -> Result<RemoteArchive, PanelError> {
        info!(host = %self.label, root, folder, "compressing remote folder");
        let archive = self
            .api
            .compress(root, &[folder.to_string()])
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(host = %self.label, folder,
                        "compression request timed out client-side, server may still be compressing");
                }
                PanelError::Compression(Box::new(e))
            })?;
        info!(host = %self.label, archive = %archive.name, size = archive.size, "archive created");
        Ok(archive)
    }

    /// Extract `archive` inside `dest_dir`, inferring completion when the
    /// control call times out.
    ///
    /// The panel keeps extracting server-side after a client timeout, and
    /// there is no completion signal to ask for. So: snapshot the listing
    /// before the request, and on timeout re-list on a fixed interval until
    /// either new content appears or the archive itself disappears. If the
    /// bounded polling window passes with neither, the operation is treated
    /// as probably-succeeded and reported [`ExtractOutcome::Unconfirmed`] —
    /// deliberately not an error.
    pub async fn decompress(
        &self,
        dest_dir: &str,
        archive: &str,
    ) -> Result<ExtractOutcome, PanelError> {
        // Listing failure here is tolerated: a missing baseline only weakens
        // the new-content test, it does not block the extraction itself.
        let before: HashSet<String> = match self.api.list(dest_dir).await {
            Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
            Err(e) => {
                warn!(host = %self.label, dest_dir, error = %e,
                    "could not snapshot destination before extraction");
                HashSet::new()
            }
        };
        let archive_was_present = before.contains(archive);

        info!(host = %self.label, dest_dir, archive, "requesting extraction");
        match self.api.decompress(dest_dir, archive).await {
            Ok(()) => {
                info!(host = %self.label, archive, "extraction confirmed by panel");
                return Ok(ExtractOutcome::Confirmed);
            }
            Err(e) if e.is_timeout() => {
                warn!(host = %self.label, archive,
                    "extraction request timed out client-side, polling destination for completion");
            }
            Err(e) => return Err(PanelError::Extraction(Box::new(e))),
        }

        for iteration in 1..=self.poll.max_polls {
            sleep(self.poll.poll_interval).await;

            let after = match self.api.list(dest_dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(host = %self.label, iteration, error = %e,
                        "listing failed during extraction poll");
                    continue;
                }
            };

            let after_names: HashSet<String> = after.into_iter().map(|e| e.name).collect();
            let new_content = after_names.difference(&before).next().is_some();
            let archive_consumed = archive_was_present && !after_names.contains(archive);

            if new_content || archive_consumed {
                info!(host = %self.label, archive, iteration, new_content, archive_consumed,
                    "extraction confirmed by destination listing");
                return Ok(ExtractOutcome::Confirmed);
            }
            debug!(host = %self.label, archive, iteration, "no extraction evidence yet");
        }

        warn!(host = %self.label, archive, polls = self.poll.max_polls,
            "extraction never confirmed, assuming it succeeded");
        Ok(ExtractOutcome::Unconfirmed)
    }

    /// Delete a single file. Callers commonly treat
    /// [`PanelError::is_not_found`] as non-fatal.
    pub async fn delete_file(&self, root: &str, name: &str) -> Result<(), PanelError> {
        debug!(host = %self.label, root, name, "deleting remote file");
        self.api.delete(root, &[name.to_string()]).await
    }

    /// Delete a folder and its contents.
    pub async fn delete_folder(&self, root: &str, name: &str) -> Result<(), PanelError> {
        info!(host = %self.label, root, name, "deleting remote folder");
        self.api.delete(root, &[name.to_string()]).await
    }

    /// Ordered directory listing; also the polling primitive above.
    pub async fn list_files(&self, dir: &str) -> Result<Vec<RemoteEntry>, PanelError> {
        self.api.list(dir).await
    }
}
