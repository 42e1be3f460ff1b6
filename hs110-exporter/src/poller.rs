//! Poll loop: fetch, decode and publish plug telemetry forever.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{PollerConfig, UnmeteredPolicy};
use crate::device::{DeviceClient, FetchError};
use crate::metrics::SharedMetrics;
use crate::telemetry::{DecodeError, decode};

/// Error type for a single poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Target not responding: {0}")]
    Fetch(#[from] FetchError),
    #[error("Target not a HS110/KP115: {0}")]
    Decode(#[from] DecodeError),
}

/// Result of a successful poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The reading carried energy metering data.
    Metered,
    /// The reading had `total_wh == 0`; only relay state and on-time were published.
    Unmetered,
}

/// State the loop enters after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Poll again after the base interval.
    Polling,
    /// Wait the backoff interval before polling again.
    BackoffWait,
}

/// Poller for a single plug.
pub struct Poller<C> {
    client: C,
    target: String,
    metrics: SharedMetrics,
    backoff: Duration,
    poll_interval: Duration,
    unmetered_policy: UnmeteredPolicy,
}

impl<C: DeviceClient> Poller<C> {
    /// Create a poller for `target` publishing into `metrics`.
    pub fn new(
        client: C,
        target: impl Into<String>,
        metrics: SharedMetrics,
        config: &PollerConfig,
    ) -> Self {
        Self {
            client,
            target: target.into(),
            metrics,
            backoff: config.backoff(),
            poll_interval: config.poll_interval(),
            unmetered_policy: config.unmetered_policy,
        }
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// Fetch and decode failures never end the loop; they are logged and
    /// retried after the backoff interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.target,
            backoff_secs = self.backoff.as_secs(),
            poll_interval_secs = self.poll_interval.as_secs(),
            unmetered_policy = ?self.unmetered_policy,
            "Starting poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = self.poll_once().await;
            match &result {
                Ok(PollOutcome::Metered) => {}
                Ok(PollOutcome::Unmetered) => {
                    warn!(
                        device = %self.target,
                        "Target '{}' does not report energy metering",
                        self.target
                    );
                }
                Err(e) => {
                    warn!(
                        device = %self.target,
                        error = %e,
                        "Target '{}' poll failed: {}",
                        self.target,
                        e
                    );
                }
            }

            let state = self.next_state(&result);
            let delay = self.delay(state);
            debug!(device = %self.target, ?state, ?delay, "Waiting for next poll");

            if !wait(delay, &mut shutdown).await {
                break;
            }
        }

        info!(device = %self.target, "Poller stopped");
    }

    /// Perform a single fetch, decode and publish cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        let raw = self.client.fetch_telemetry(&self.target).await?;
        let reading = decode(&raw)?;

        self.metrics.publish(&self.target, &reading);

        info!(
            device = %self.target,
            model = %reading.model,
            "Target '{}' HS110 data: {}",
            self.target,
            reading.summary()
        );

        if reading.supports_metering() {
            Ok(PollOutcome::Metered)
        } else {
            Ok(PollOutcome::Unmetered)
        }
    }

    /// State to enter after a cycle with the given result.
    pub fn next_state(&self, result: &Result<PollOutcome, PollError>) -> PollState {
        match result {
            Ok(PollOutcome::Metered) => PollState::Polling,
            Ok(PollOutcome::Unmetered) => match self.unmetered_policy {
                UnmeteredPolicy::Backoff => PollState::BackoffWait,
                UnmeteredPolicy::Tight => PollState::Polling,
            },
            Err(_) => PollState::BackoffWait,
        }
    }

    /// Wait before the next cycle in the given state.
    pub fn delay(&self, state: PollState) -> Duration {
        match state {
            PollState::Polling => self.poll_interval,
            PollState::BackoffWait => self.backoff,
        }
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `false` when the loop should stop.
async fn wait(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !*shutdown.borrow();
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
