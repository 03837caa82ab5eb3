//! Remote process lifecycle control
//!
//! Power signals are fire-and-forget at the panel; observing the resulting
//! state is a separate, unreliable endpoint. During transitions the state
//! query may error or report stale values, so convergence waiting accepts
//! several satisfaction signals, including an optimistic fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::error::PanelError;
use super::types::{PowerAction, PowerState};

/// Process-control surface of the panel API.
#[async_trait]
pub trait ProcessApi: Send + Sync {
    async fn send_power(&self, action: PowerAction) -> Result<(), PanelError>;

    async fn query_state(&self) -> Result<PowerState, PanelError>;

    /// Run a console command on the host.
    async fn send_command(&self, command: &str) -> Result<(), PanelError>;
}

/// How a state wait was satisfied.
///
/// `Assumed` means the fixed delay elapsed and we chose availability over
/// certainty; false positives are possible and must stay visible in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOutcome {
    Confirmed,
    Assumed,
}

/// Tuning for [`RemoteProcessController::await_state`].
#[derive(Debug, Clone)]
pub struct StateWait {
    /// Fixed polling tick, independent of the overall timeout.
    pub poll_interval: Duration,
    /// Overall deadline after which the wait fails with `StateTimeout`.
    pub timeout: Duration,
    /// Optimistically assume success once this much time has passed.
    /// `None` disables the fallback.
    pub assume_after: Option<Duration>,
    /// When awaiting `Offline`: this many consecutive transient errors from
    /// the state endpoint are read as "the host is down".
    pub offline_error_threshold: u32,
}

impl Default for StateWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(180),
            assume_after: Some(Duration::from_secs(90)),
            offline_error_threshold: 3,
        }
    }
}

/// Power-state transitions and convergence waiting for one managed host.
#[derive(Clone)]
pub struct RemoteProcessController {
    api: Arc<dyn ProcessApi>,
    /// Host label for logs ("source" / "dest").
    label: String,
}

impl RemoteProcessController {
    pub fn new(api: Arc<dyn ProcessApi>, label: impl Into<String>) -> Self {
        Self {
            api,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send a power signal. Idempotent: a conflict response (host already in
    /// the requested state) is success.
    pub async fn set_power_state(&self, action: PowerAction) -> Result<(), PanelError> {
        match self.api.send_power(action).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!(host = %self.label, signal = action.signal(),
                    "power signal conflicted, host already in requested state");
                Ok(())
            }
            Err(e) => Err(PanelError::Control(format!(
                "power signal {} to {} failed: {e}",
                action.signal(),
                self.label
            ))),
        }
    }

    /// Broadcast a console message. Best-effort by contract: callers treat a
    /// failure here as non-fatal.
    pub async fn notify(&self, message: &str) -> Result<(), PanelError> {
        self.api.send_command(&format!("say {message}")).await
    }

    /// Wait until the host reaches `target`.
    ///
    /// Satisfied by an explicit state match, by repeated transient errors
    /// when awaiting `Offline` (the panel stops answering for a host that is
    /// down), or optimistically once `assume_after` elapses. Otherwise fails
    /// with [`PanelError::StateTimeout`] carrying the last observed state.
    pub async fn await_state(
        &self,
        target: PowerState,
        opts: &StateWait,
    ) -> Result<StateOutcome, PanelError> {
        let started = Instant::now();
        let mut last_observed: Option<PowerState> = None;
        let mut consecutive_errors: u32 = 0;

        loop {
            match self.api.query_state().await {
                Ok(state) => {
                    consecutive_errors = 0;
                    last_observed = Some(state);
                    if state == target {
                        info!(host = %self.label, ?target, "state confirmed");
                        return Ok(StateOutcome::Confirmed);
                    }
                    debug!(host = %self.label, ?state, ?target, "still waiting for state");
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    debug!(host = %self.label, error = %e, consecutive_errors,
                        "transient error from state endpoint");
                    if target == PowerState::Offline
                        && consecutive_errors >= opts.offline_error_threshold
                    {
                        // A host that is down takes its state endpoint with it.
                        info!(host = %self.label,
                            "state endpoint unreachable {consecutive_errors} times, treating host as offline");
                        return Ok(StateOutcome::Confirmed);
                    }
                }
                Err(e) => {
                    return Err(PanelError::Control(format!(
                        "state query for {} failed: {e}",
                        self.label
                    )));
                }
            }

            let elapsed = started.elapsed();
            if let Some(assume_after) = opts.assume_after {
                if elapsed >= assume_after {
                    warn!(host = %self.label, ?target, ?last_observed,
                        "state not confirmed after {:?}, assuming success", assume_after);
                    return Ok(StateOutcome::Assumed);
                }
            }
            if elapsed >= opts.timeout {
                return Err(PanelError::StateTimeout {
                    target,
                    last: last_observed,
                });
            }

            sleep(opts.poll_interval).await;
        }
    }
}
