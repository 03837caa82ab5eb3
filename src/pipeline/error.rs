//! Pipeline error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::panel::PanelError;
use crate::relay::RelayError;

use super::tracker::StepKey;

/// What went wrong inside a single step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("local staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A relay endpoint could not be brought up before the run started.
    #[error("connection setup failed: {0}")]
    Connect(#[from] RelayError),

    #[error("step {step} failed: {source}")]
    Step {
        step: StepKey,
        #[source]
        source: StepError,
    },
}
