//! worldferry - moves a game world between two panel-managed hosts.
//!
//! The two hosts cannot reach each other directly, so the world travels as a
//! server-side archive relayed through a local staging file over SFTP, while
//! the panel control plane handles power state and compress/extract. The
//! pipeline is fixed-order with per-step progress tracking and best-effort
//! rollback on failure.

pub mod config;
pub mod panel;
pub mod pipeline;
pub mod relay;

pub use config::{ConfigError, HostConfig, SftpEndpoint, TransferConfig};
pub use panel::{PanelClient, PanelError, PowerAction, PowerState};
pub use pipeline::{PipelineError, StepKey, StepStatus, StepTracker, TrackerSnapshot, WorldTransfer};
pub use relay::{RelayError, RelayProgress, RelayTransferClient, RemoteVolume, SftpSession, TransferPhase};
