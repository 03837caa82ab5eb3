//! Transfer pipeline
//!
//! Fixed-order step execution with per-step progress tracking, best-effort
//! rollback on failure, and unconditional connection cleanup.

mod error;
mod orchestrator;
mod tracker;

pub use error::{PipelineError, StepError};
pub use orchestrator::{sweep_stale_staging, HostHandle, WorldTransfer};
pub use tracker::{StepKey, StepRecord, StepStatus, StepTracker, TrackerSnapshot};
