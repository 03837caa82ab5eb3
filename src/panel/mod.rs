//! Panel control-plane module
//!
//! Talks to the third-party panel that manages each host: power signals,
//! state queries, console commands, and the compress/extract/delete/list
//! file API. The file API gives no completion signal for extraction, so
//! this module also owns the polling completion-detection heuristic.

pub mod client;
pub mod error;
pub mod files;
pub mod power;
pub mod types;

pub use client::{PanelClient, RequestTimeouts};
pub use error::PanelError;
pub use files::{ExtractOutcome, FileOpsApi, PollSettings, RemoteFileClient};
pub use power::{ProcessApi, RemoteProcessController, StateOutcome, StateWait};
pub use types::*;
