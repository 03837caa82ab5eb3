//! Remote volume boundary
//!
//! Object-safe seam over one host's relay filesystem so transfer and
//! pipeline code never depend on the concrete SFTP session.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::RelayError;
use super::types::{FileStat, VolumeEntry};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One remote host's filesystem, rooted at the endpoint's root path.
///
/// All paths are relative to that root; implementations own the joining.
#[async_trait]
pub trait RemoteVolume: Send + Sync {
    async fn stat(&self, path: &str) -> Result<FileStat, RelayError>;

    async fn entries(&self, dir: &str) -> Result<Vec<VolumeEntry>, RelayError>;

    /// Open a remote file for streaming reads.
    async fn open_read(&self, path: &str) -> Result<BoxedReader, RelayError>;

    /// Create (or truncate) a remote file for streaming writes.
    async fn open_write(&self, path: &str) -> Result<BoxedWriter, RelayError>;

    async fn mkdir(&self, path: &str) -> Result<(), RelayError>;

    async fn remove_file(&self, path: &str) -> Result<(), RelayError>;

    /// Tear down the underlying connection. Safe to call once per volume;
    /// the pipeline calls it from its cleanup path regardless of outcome.
    async fn close(&self) -> Result<(), RelayError>;
}
