//! Panel data types

use serde::{Deserialize, Serialize};

/// Power signal accepted by the panel's power endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerAction {
    pub fn signal(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Restart => "restart",
            PowerAction::Kill => "kill",
        }
    }
}

/// Host state as reported by the panel's state-query endpoint.
///
/// The endpoint is unreliable during transitions; see
/// [`RemoteProcessController::await_state`](super::power::RemoteProcessController::await_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Offline,
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// One entry from the managed filesystem's list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub is_file: bool,
    pub mime_type: String,
    /// RFC 3339 modification timestamp as reported by the panel.
    pub modified_at: String,
}

/// Server-assigned archive descriptor returned by the compress endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteArchive {
    pub name: String,
    pub size: u64,
}
