//! Relay transport module
//!
//! The two hosts cannot reach each other directly, so bytes travel in two
//! hops through a local staging file: source SFTP → local disk → dest SFTP.
//! Live throughput and ETA are reported along the way.

pub mod error;
pub mod path;
pub mod session;
pub mod transfer;
pub mod types;
pub mod volume;

pub use error::RelayError;
pub use path::join_remote_path;
pub use session::SftpSession;
pub use transfer::RelayTransferClient;
pub use types::{FileStat, RelayProgress, TransferPhase, VolumeEntry};
pub use volume::{BoxedReader, BoxedWriter, RemoteVolume};
