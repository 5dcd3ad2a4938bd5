//! Per-attempt time bounds and transient-failure retry with backoff.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pq_core::{Error, Result, RetryConfig};

/// Races `operation` against a timer.
///
/// This is a best-effort bound, not a cancellation primitive: when the
/// timer wins, the operation keeps running on a detached task and its
/// eventual outcome is discarded. Callers that lease resources inside the
/// operation must release them on their own completion path.
pub async fn with_timeout<T, F>(timeout: Duration, operation: F) -> Result<T>
where
	T: Send + 'static,
	F: Future<Output = Result<T>> + Send + 'static,
{
	let mut handle: JoinHandle<Result<T>> = tokio::spawn(operation);
	tokio::select! {
		joined = &mut handle => match joined {
			Ok(result) => result,
			Err(err) => Err(Error::TaskFatal(format!("task aborted: {err}"))),
		},
		_ = tokio::time::sleep(timeout) => {
			warn!(target = "pq.retry", timeout_ms = timeout.as_millis() as u64, "attempt timed out, loser keeps running");
			Err(Error::TaskTimeout { timeout_ms: timeout.as_millis() as u64 })
		}
	}
}

/// Attempts `make_attempt` up to `config.max_attempts` times, sleeping an
/// exponentially increasing, capped delay between transient failures.
///
/// Only errors that are inherently transient or whose text matches one of
/// the configured signatures are retried; anything else surfaces
/// immediately. A `CircuitOpen` rejection is never retried here — the
/// breaker wraps this function, not the other way around.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut make_attempt: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let max_attempts = config.max_attempts.max(1);
	let mut delay_ms = config.initial_delay_ms;

	for attempt in 1..=max_attempts {
		match make_attempt().await {
			Ok(value) => return Ok(value),
			Err(err) if attempt < max_attempts && is_retryable(&err, &config.retryable_errors) => {
				debug!(
					target = "pq.retry",
					attempt,
					max_attempts,
					delay_ms,
					error = %err,
					"transient failure, backing off"
				);
				tokio::time::sleep(Duration::from_millis(delay_ms)).await;
				delay_ms = next_delay(delay_ms, config);
			}
			Err(err) => return Err(err),
		}
	}

	// 1..=max_attempts always returns from within the loop.
	Err(Error::TaskFatal("retry loop exited without attempting".to_string()))
}

fn next_delay(current_ms: u64, config: &RetryConfig) -> u64 {
	let scaled = (current_ms as f64 * config.backoff_multiplier.max(1.0)) as u64;
	scaled.min(config.max_delay_ms)
}

fn is_retryable(err: &Error, signatures: &[String]) -> bool {
	if matches!(err, Error::CircuitOpen { .. }) {
		return false;
	}
	if err.is_transient() {
		return true;
	}
	let message = err.to_string().to_lowercase();
	signatures
		.iter()
		.filter(|signature| !signature.is_empty())
		.any(|signature| message.contains(&signature.to_lowercase()))
}
