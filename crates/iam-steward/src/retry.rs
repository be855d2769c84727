//! Exponential backoff retries with cancellation support.
//!
//! Newly created service accounts and bindings are not immediately visible to
//! subsequent reads and writes, so every read-after-write against the remote
//! API runs through [`retry`].

use crate::error::{Error, Result};
use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff configuration for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay between attempts
    #[serde(with = "millis", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap for exponential growth)
    #[serde(with = "millis", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Maximum total time before giving up
    #[serde(with = "millis", default = "default_timeout")]
    pub timeout: Duration,
    /// Randomize delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            timeout: default_timeout(),
            jitter: default_jitter(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Stop and return this value
    Done(T),
    /// Not there yet; the optional error is reported if the deadline passes
    Retry(Option<Error>),
}

/// Call `attempt` until it reports [`Attempt::Done`], returns an error, or the
/// deadline passes.
///
/// An `Err` from `attempt` is terminal and returned immediately. Cancellation is
/// observed between attempts; an attempt already in flight is allowed to finish.
///
/// # Example
/// ```ignore
/// let policy = retry(&config, &cancel, "fetching project policy", || async {
///     match handle.get_policy(&resource).await {
///         Ok(p) => Ok(Attempt::Done(p)),
///         Err(e) if e.is_retryable() => Ok(Attempt::Retry(Some(e))),
///         Err(e) => Err(e),
///     }
/// })
/// .await?;
/// ```
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    what: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut attempts = 0u32;
    let mut last_error = None;

    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_max_times(usize::MAX);
    if config.jitter {
        builder = builder.with_jitter();
    }
    let mut delays = builder.build();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                what: what.to_string(),
            });
        }
        // No further call once the deadline has passed, even mid-backoff
        if attempts > 0 && Instant::now() >= deadline {
            warn!(what, attempts, "Giving up after timeout");
            return Err(Error::Timeout {
                what: what.to_string(),
                attempts,
                elapsed: start.elapsed(),
                last: last_error.map(Box::new),
            });
        }

        attempts += 1;
        match attempt().await? {
            Attempt::Done(value) => {
                if attempts > 1 {
                    debug!(what, attempts, "Retried operation succeeded");
                }
                return Ok(value);
            }
            Attempt::Retry(err) => {
                if let Some(e) = &err {
                    debug!(what, attempt = attempts, error = %e, "Attempt failed, retrying");
                }
                last_error = err.or(last_error);
            }
        }

        let delay = delays
            .next()
            .unwrap_or(config.max_delay)
            .min(deadline.saturating_duration_since(Instant::now()));

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { what: what.to_string() });
            }
        }
    }
}

/// Retry `op` while it fails with a retryable error.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry(config, cancel, what, || {
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(Attempt::Done(value)),
                Err(e) if e.is_retryable() => Ok(Attempt::Retry(Some(e))),
                Err(e) => Err(e),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_done() {
        let calls = AtomicU32::new(0);
        let value = retry(&fast(), &CancellationToken::new(), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Ok(Attempt::Retry(None))
            } else {
                Ok(Attempt::Done(n))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast(), &CancellationToken::new(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidInput("nope".into()))
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_wraps_last_error() {
        let config = RetryConfig {
            timeout: Duration::from_millis(200),
            ..fast()
        };
        let result: Result<()> = retry(&config, &CancellationToken::new(), "waiting", || async {
            Ok(Attempt::Retry(Some(Error::RemoteTransient {
                status: 503,
                message: "unavailable".into(),
            })))
        })
        .await;

        match result {
            Err(Error::Timeout { attempts, last, .. }) => {
                assert!(attempts > 1);
                assert!(matches!(last.as_deref(), Some(Error::RemoteTransient { .. })));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_attempt_after_deadline() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(60),
            max_delay: Duration::from_millis(60),
            timeout: Duration::from_millis(100),
            jitter: false,
        };
        let start = Instant::now();
        let calls = std::sync::Mutex::new(Vec::new());
        let result: Result<()> = retry(&config, &CancellationToken::new(), "waiting", || {
            calls.lock().unwrap().push(start.elapsed());
            async { Ok(Attempt::Retry(None)) }
        })
        .await;

        // Attempts at 0ms and 60ms; the clamped 40ms sleep ends at the deadline
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 2, "{calls:?}");
        assert!(calls.iter().all(|at| *at < config.timeout), "{calls:?}");
        assert!(matches!(result, Err(Error::Timeout { attempts: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast(), &cancel, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                cancel.cancel();
            }
            async { Ok(Attempt::Retry(None)) }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_transient_classifies_errors() {
        let calls = AtomicU32::new(0);
        let value = retry_transient(&fast(), &CancellationToken::new(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::PropagationDelay {
                    message: "not yet".into(),
                })
            } else {
                Ok("ok")
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "ok");

        let result: Result<()> = retry_transient(&fast(), &CancellationToken::new(), "test", || async {
            Err(Error::RemoteNotFound {
                message: "gone".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(Error::RemoteNotFound { .. })));
    }

    #[test]
    fn config_serializes_as_millis() {
        let json = serde_json::to_value(fast()).unwrap();
        assert_eq!(json["initial_delay"], 10);
        let parsed: RetryConfig = serde_json::from_value(serde_json::json!({ "timeout": 1000 })).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(1));
        assert_eq!(parsed.max_delay, default_max_delay());
    }
}
