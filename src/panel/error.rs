//! Panel error types

use thiserror::Error;

use super::types::PowerState;

#[derive(Error, Debug)]
pub enum PanelError {
    /// Connection-level failure before any HTTP status was received.
    #[error("panel transport error: {0}")]
    Transport(String),

    /// The client-side timeout fired. The server may still be working on
    /// the request; compress/extract callers care about this distinction.
    #[error("panel request timed out: {0}")]
    RequestTimeout(String),

    /// The panel answered with a non-success status.
    #[error("panel rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Power/state control failure that is not a plain HTTP rejection.
    #[error("remote control error: {0}")]
    Control(String),

    /// State convergence was not observed within the allowed window.
    #[error("host did not reach {target:?} in time (last observed: {last:?})")]
    StateTimeout {
        target: PowerState,
        last: Option<PowerState>,
    },

    #[error("compression failed")]
    Compression(#[source] Box<PanelError>),

    #[error("extraction rejected by panel")]
    Extraction(#[source] Box<PanelError>),

    #[error("unexpected panel response: {0}")]
    BadResponse(String),
}

impl PanelError {
    /// Transient transport-level failures. During a shutdown wait these are
    /// read as "the host is going down", not as errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PanelError::Transport(_) | PanelError::RequestTimeout(_)
        ) || matches!(self, PanelError::Rejected { status, .. } if *status == 502 || *status == 504)
    }

    /// True when the client-side timeout fired (server possibly still busy).
    pub fn is_timeout(&self) -> bool {
        matches!(self, PanelError::RequestTimeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PanelError::Rejected { status: 404, .. })
    }

    /// "Already in the requested state" response from the power endpoint.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PanelError::Rejected { status: 409, .. })
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PanelError::RequestTimeout(err.to_string())
        } else if let Some(status) = err.status() {
            PanelError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            PanelError::Transport(err.to_string())
        }
    }
}
