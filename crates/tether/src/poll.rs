//! The poll loop.
//!
//! Every wait in the crate (function outputs, exit codes, stream reads, file
//! operation results) is a chain of bounded attempts driven by
//! [`poll_until`]. Each attempt asks the server to hold the request open for
//! at most [`PollOptions::attempt_cap`], or for whatever is left of the
//! caller's timeout if that is shorter.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Added to an attempt's server-side wait to form its RPC deadline.
pub const RPC_GRACE: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Retries [`retry_transient`] grants a single-shot RPC.
const MAX_TRANSIENT_FAILURES: u32 = 10;

/// Round-trip allowance for the single check a zero timeout makes.
const NON_BLOCKING_BUDGET: Duration = Duration::from_secs(1);

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// The awaited value arrived.
    Ready(T),
    /// The attempt's wait elapsed without a value.
    Pending,
}

/// Bounds for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Overall deadline measured from the start of the loop. `None` waits
    /// indefinitely; zero makes a single non-blocking check.
    pub timeout: Option<Duration>,
    /// Longest server-side wait for a single attempt.
    pub attempt_cap: Duration,
}

impl PollOptions {
    /// RPC deadline for an attempt that waits `wait` server-side.
    pub fn rpc_timeout(wait: Duration) -> Duration {
        wait + RPC_GRACE
    }
}

/// Drive `attempt` until it yields a value, the timeout passes, or `cancel`
/// fires.
///
/// `attempt` receives the server-side wait to request. No attempt outlives
/// the overall deadline. Transient transport errors are retried with capped
/// backoff until the deadline passes or, with no deadline, until `cancel`
/// fires; any other error ends the loop.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    options: PollOptions,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let non_blocking = options.timeout == Some(Duration::ZERO);
    let started = Instant::now();
    let deadline = options.timeout.map(|timeout| started + timeout);
    let attempt_deadline = match deadline {
        Some(_) if non_blocking => Some(started + NON_BLOCKING_BUDGET),
        other => other,
    };
    let deadline_exceeded = || Error::DeadlineExceeded {
        operation: operation.to_string(),
        timeout: options.timeout.unwrap_or_default(),
    };

    let mut backoff = INITIAL_BACKOFF;
    let mut transient_failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }

        let wait = match deadline {
            Some(deadline) => options
                .attempt_cap
                .min(deadline.saturating_duration_since(Instant::now())),
            None => options.attempt_cap,
        };
        trace!(operation, ?wait, "poll attempt");

        let outcome = match attempt_deadline {
            Some(at) => match tokio::time::timeout_at(at, attempt(wait)).await {
                Ok(outcome) => outcome,
                Err(_) if non_blocking => {
                    return Err(Error::NotReady {
                        operation: operation.to_string(),
                    });
                }
                Err(_) => return Err(deadline_exceeded()),
            },
            None => attempt(wait).await,
        };

        match outcome {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => {
                backoff = INITIAL_BACKOFF;
                transient_failures = 0;
                if non_blocking {
                    return Err(Error::NotReady {
                        operation: operation.to_string(),
                    });
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(deadline_exceeded());
                }
            }
            Err(err) if err.is_transient() && !non_blocking => {
                transient_failures += 1;
                if deadline.is_some_and(|deadline| Instant::now() + backoff >= deadline) {
                    return Err(deadline_exceeded());
                }
                warn!(
                    operation,
                    error = %err,
                    attempt = transient_failures,
                    "transient error, retrying"
                );
                sleep_or_cancel(operation, backoff, cancel).await?;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Replay a single idempotent RPC while it fails transiently.
pub async fn retry_transient<T, F, Fut>(
    operation: &str,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut retries = 0u32;
    loop {
        match attempt().await {
            Err(err) if err.is_transient() && retries < MAX_TRANSIENT_FAILURES => {
                retries += 1;
                warn!(operation, error = %err, retry = retries, "transient error, retrying");
                sleep_or_cancel(operation, backoff, cancel).await?;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            result => return result,
        }
    }
}

async fn sleep_or_cancel(
    operation: &str,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
