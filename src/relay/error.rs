//! Relay error types

use thiserror::Error;

use super::types::TransferPhase;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A two-hop transfer failed; wraps the phase and the underlying cause.
    #[error("{phase:?} phase failed")]
    Transfer {
        phase: TransferPhase,
        #[source]
        source: Box<RelayError>,
    },
}

impl RelayError {
    pub fn in_phase(self, phase: TransferPhase) -> Self {
        RelayError::Transfer {
            phase,
            source: Box::new(self),
        }
    }
}

impl From<russh::Error> for RelayError {
    fn from(err: russh::Error) -> Self {
        RelayError::Protocol(err.to_string())
    }
}
