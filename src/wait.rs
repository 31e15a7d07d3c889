//! Bounded, cancellable readiness polling.
//!
//! Every wait in the crate (transit gateway, attachments, NAT gateway,
//! instance, SSH) goes through [`poll_until`]: check, and when the target is
//! not ready yet sleep for the fixed interval, until it is ready, the
//! deadline passes, or the run is cancelled.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cloud::{ApiCall, CloudApi};
use crate::lookup::LookupPath;

/// Default delay between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default bound on a single wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Poll cadence and bound.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay between checks.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Creates a policy from whole seconds.
    #[must_use]
    pub const fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Outcome of one check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Poll<T> {
    /// The target is ready.
    Ready(T),
    /// Not ready yet; the text describes the observed state.
    Pending(String),
}

/// Successful wait result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Waited<T> {
    /// Value produced by the final check.
    pub value: T,
    /// Number of checks performed.
    pub attempts: u32,
}

/// Errors raised when a wait does not complete.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// Raised when the deadline passes first.
    #[error("timed out waiting for {what} after {attempts} attempts (last observed: {last})")]
    TimedOut {
        /// What was being waited for.
        what: String,
        /// Checks performed.
        attempts: u32,
        /// Last pending state or check failure.
        last: String,
    },
    /// Raised when the run is cancelled.
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// What was being waited for.
        what: String,
    },
}

/// Runs `check` until it reports [`Poll::Ready`].
///
/// Check failures are logged and treated as pending so a transient describe
/// error does not abort the run; the latest one is reported on timeout.
///
/// # Errors
///
/// Returns [`WaitError::TimedOut`] once `policy.timeout` has elapsed and
/// [`WaitError::Cancelled`] when `cancel` fires.
pub async fn poll_until<T, E, F>(
    what: &str,
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<Waited<T>, WaitError>
where
    E: Display,
    F: FnMut() -> Result<Poll<T>, E>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                what: what.to_owned(),
            });
        }
        attempts = attempts.saturating_add(1);
        let last = match check() {
            Ok(Poll::Ready(value)) => {
                debug!(what, attempts, "wait complete");
                return Ok(Waited { value, attempts });
            }
            Ok(Poll::Pending(state)) => {
                debug!(what, attempts, state = %state, "still waiting");
                state
            }
            Err(err) => {
                debug!(what, attempts, error = %err, "check failed; treating as pending");
                err.to_string()
            }
        };

        if Instant::now() + policy.interval > deadline {
            return Err(WaitError::TimedOut {
                what: what.to_owned(),
                attempts,
                last,
            });
        }

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(WaitError::Cancelled { what: what.to_owned() });
            }
            () = sleep(policy.interval) => {}
        }
    }
}

/// A wait policy paired with the run's cancellation token.
#[derive(Clone, Debug, Default)]
pub struct Waiter {
    policy: WaitPolicy,
    cancel: CancellationToken,
}

impl Waiter {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(policy: WaitPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Poll cadence and bound.
    #[must_use]
    pub const fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Token cancelling every wait of the run.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs [`poll_until`] with this waiter's policy and token.
    ///
    /// # Errors
    ///
    /// See [`poll_until`].
    pub async fn until<T, E, F>(&self, what: &str, check: F) -> Result<Waited<T>, WaitError>
    where
        E: Display,
        F: FnMut() -> Result<Poll<T>, E>,
    {
        info!(what, "waiting");
        poll_until(what, self.policy, &self.cancel, check).await
    }

    /// Repeats `call` until the scalar at `expression` equals `expected`.
    ///
    /// # Errors
    ///
    /// See [`poll_until`].
    pub async fn for_state<C: CloudApi>(
        &self,
        cloud: &C,
        what: &str,
        call: &ApiCall,
        expression: &str,
        expected: &str,
    ) -> Result<Waited<()>, WaitError> {
        self.until(what, || {
            let response = cloud.invoke(call).map_err(|err| err.to_string())?;
            let state = LookupPath::parse(expression)
                .and_then(|path| path.extract(&response))
                .map_err(|err| err.to_string())?;
            Ok::<_, String>(if state == expected {
                Poll::Ready(())
            } else {
                Poll::Pending(state)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCloud;
    use serde_json::json;
    use std::convert::Infallible;

    const POLICY: WaitPolicy = WaitPolicy::from_secs(10, 1800);

    #[tokio::test(start_paused = true)]
    async fn ready_after_pending_polls_sleeps_between_checks() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let mut states = vec!["pending", "pending", "pending", "available"].into_iter();

        let waited = poll_until("transit gateway", POLICY, &cancel, || {
            let state = states.next().unwrap_or("available");
            Ok::<_, Infallible>(if state == "available" {
                Poll::Ready(state)
            } else {
                Poll::Pending(state.to_owned())
            })
        })
        .await
        .expect("wait should succeed");

        assert_eq!(waited.attempts, 4);
        assert_eq!(waited.value, "available");
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_check_does_not_sleep() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let waited = poll_until("instance", POLICY, &cancel, || {
            Ok::<_, Infallible>(Poll::Ready(7))
        })
        .await
        .expect("wait should succeed");

        assert_eq!(waited.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_count_as_pending_and_surface_on_timeout() {
        let cancel = CancellationToken::new();
        let policy = WaitPolicy::from_secs(10, 30);

        let err = poll_until("nat gateway", policy, &cancel, || {
            Err::<Poll<()>, _>("throttled")
        })
        .await
        .expect_err("wait should time out");

        assert_eq!(
            err,
            WaitError::TimedOut {
                what: String::from("nat gateway"),
                attempts: 4,
                last: String::from("throttled"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let err = poll_until("ssh", POLICY, &cancel, || {
            Ok::<Poll<()>, Infallible>(Poll::Pending(String::from("refused")))
        })
        .await
        .expect_err("wait should be cancelled");

        assert_eq!(
            err,
            WaitError::Cancelled {
                what: String::from("ssh")
            }
        );
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_checking() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut checks = 0;

        let err = poll_until("ssh", POLICY, &cancel, || {
            checks += 1;
            Ok::<Poll<()>, Infallible>(Poll::Ready(()))
        })
        .await
        .expect_err("cancelled");

        assert!(matches!(err, WaitError::Cancelled { .. }));
        assert_eq!(checks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn for_state_compares_the_looked_up_state() {
        let cloud = ScriptedCloud::new();
        cloud.push(
            "describe-transit-gateways",
            json!({"TransitGateways": [{"State": "pending"}]}),
        );
        cloud.push_error("describe-transit-gateways", "RequestLimitExceeded");
        cloud.respond(
            "describe-transit-gateways",
            json!({"TransitGateways": [{"State": "available"}]}),
        );
        let waiter = Waiter::new(POLICY, CancellationToken::new());

        let waited = waiter
            .for_state(
                &cloud,
                "transit gateway",
                &ApiCall::ec2("describe-transit-gateways"),
                "TransitGateways[0].State",
                "available",
            )
            .await
            .expect("wait should succeed");

        assert_eq!(waited.attempts, 3);
        assert_eq!(cloud.calls_to("describe-transit-gateways").len(), 3);
    }
}
