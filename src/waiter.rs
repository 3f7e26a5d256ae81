//! Bounded polling.
//!
//! [`wait_until`] polls at a fixed interval until the poll function reports
//! ready, the deadline passes or the cancellation token fires. Readiness
//! predicates belong to the resource modules; this module only loops.
//!
//! Every poll result is remembered so a failed wait still reports the last
//! thing it saw.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T, S> {
    /// The condition holds.
    Ready(T),
    /// Not yet; carries the observed status.
    Pending(S),
}

/// What to wait for and for how long.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSpec {
    /// Human-readable description, e.g. `volume 7 to become active`.
    pub description: String,
    /// Time between polls.
    pub interval: Duration,
    /// Maximum total wait.
    pub timeout: Duration,
}

impl WaitSpec {
    /// Describe a wait.
    pub fn new(description: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            interval,
            timeout,
        }
    }

    /// Clamp the timeout to what remains before `deadline`.
    pub fn within(mut self, deadline: Option<Instant>) -> Self {
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            self.timeout = self.timeout.min(left);
        }
        self
    }
}

/// Why a wait failed.
#[derive(Debug, Error)]
pub enum WaitError<S> {
    /// The deadline elapsed.
    #[error("timed out after {elapsed:?} waiting for {description}")]
    Timeout {
        /// What was awaited.
        description: String,
        /// Time spent.
        elapsed: Duration,
        /// The last observed status, if any poll succeeded.
        last: Option<S>,
    },
    /// The cancellation token fired.
    #[error("cancelled while waiting for {description}")]
    Cancelled {
        /// What was awaited.
        description: String,
        /// The last observed status.
        last: Option<S>,
    },
    /// The poll function failed permanently.
    #[error("{source}")]
    Failed {
        /// The poll error.
        source: ProviderError,
        /// The last observed status.
        last: Option<S>,
    },
}

impl<S> WaitError<S> {
    /// The last status observed before failing.
    pub fn last(&self) -> Option<&S> {
        match self {
            Self::Timeout { last, .. }
            | Self::Cancelled { last, .. }
            | Self::Failed { last, .. } => {
                last.as_ref()
            },
        }
    }
}

impl<S: Display> From<WaitError<S>> for ProviderError {
    fn from(err: WaitError<S>) -> Self {
        match err {
            WaitError::Timeout {
                description,
                elapsed,
                last,
            } => ProviderError::Timeout {
                what: description,
                elapsed_secs: elapsed.as_secs(),
                last_observed: last.map(|s| s.to_string()),
            },
            WaitError::Cancelled { description, .. } => {
                ProviderError::Cancelled(format!("while waiting for {}", description))
            },
            WaitError::Failed { source, .. } => source,
        }
    }
}

/// Poll until ready, timed out or cancelled.
///
/// `poll` returns `Ok(Poll::Ready(v))` when done, `Ok(Poll::Pending(status))`
/// to keep waiting, or `Err` to abort. Errors are never swallowed here; a
/// poll function that expects transient 404s maps them to `Pending` itself.
pub async fn wait_until<T, S, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<T, WaitError<S>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T, S>, ProviderError>>,
    S: Display,
{
    let start = Instant::now();
    let deadline = start + spec.timeout;
    let mut last: Option<S> = None;

    loop {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = poll() => Some(result),
        };

        match polled {
            None => {
                return Err(WaitError::Cancelled {
                    description: spec.description.clone(),
                    last,
                })
            },
            Some(Ok(Poll::Ready(value))) => return Ok(value),
            Some(Ok(Poll::Pending(status))) => {
                debug!(waiting_for = %spec.description, status = %status, "Not ready yet");
                last = Some(status);
            },
            Some(Err(err)) if err.is_cancelled() => {
                return Err(WaitError::Cancelled {
                    description: spec.description.clone(),
                    last,
                })
            },
            Some(Err(source)) => return Err(WaitError::Failed { source, last }),
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                waiting_for = %spec.description,
                last_observed = %last.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                "Wait timed out"
            );
            return Err(WaitError::Timeout {
                description: spec.description.clone(),
                elapsed: now - start,
                last,
            });
        }

        let sleep = spec.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled {
                    description: spec.description.clone(),
                    last,
                })
            },
            _ = tokio::time::sleep(sleep) => {},
        }
    }
}

/// Poll until the object is gone, i.e. the poll returns NotFound.
pub async fn wait_for_deletion<F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<(), ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, ProviderError>>,
{
    wait_until(spec, cancel, || {
        let fut = fetch();
        async move {
            match fut.await {
                Ok(status) => Ok(Poll::Pending(status)),
                Err(e) if e.is_not_found() => Ok(Poll::Ready(())),
                Err(e) => Err(e),
            }
        }
    })
    .await
    .map_err(ProviderError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn spec(timeout_ms: u64) -> WaitSpec {
        WaitSpec::new(
            "volume 7 to become active",
            Duration::from_millis(5),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_ready_after_pending() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        let value = wait_until(&spec(1_000), &CancellationToken::new(), || {
            let p = p.clone();
            async move {
                if p.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Poll::Pending("creating".to_string()))
                } else {
                    Ok(Poll::Ready(7))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_carries_last_status() {
        let err = wait_until::<(), _, _, _>(&spec(30), &CancellationToken::new(), || async {
            Ok(Poll::Pending("creating".to_string()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.last().map(String::as_str), Some("creating"));
        let err: ProviderError = err.into();
        assert!(err.to_string().contains("last observed: creating"));
    }

    #[tokio::test]
    async fn test_cancel_exits_immediately() {
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.cancel();
        });

        let started = std::time::Instant::now();
        let err = wait_until::<(), _, _, _>(&spec(60_000), &cancel, || async {
            Ok(Poll::Pending("booting".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_error_aborts() {
        let err = wait_until::<(), String, _, _>(&spec(1_000), &CancellationToken::new(), || async {
            Err(ProviderError::Conflict("locked".into()))
        })
        .await
        .unwrap_err();
        let err: ProviderError = err.into();
        assert!(matches!(err, ProviderError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_wait_for_deletion() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        wait_for_deletion(&spec(1_000), &CancellationToken::new(), || {
            let p = p.clone();
            async move {
                if p.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok("deleting".to_string())
                } else {
                    Err(ProviderError::NotFound("gone".into()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_within_clamps_timeout() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let spec = WaitSpec::new("x", Duration::from_secs(1), Duration::from_secs(600))
            .within(Some(deadline));
        assert!(spec.timeout <= Duration::from_secs(1));
    }
}
