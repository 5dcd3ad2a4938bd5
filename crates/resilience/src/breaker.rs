//! Circuit breaker over the automation pipeline.
//!
//! The breaker treats any error from the wrapped operation as a failure
//! signal; classification is the caller's concern. Composed outside the
//! retry wrapper, it sees one aggregate outcome per logical call, so a
//! transient failure recovered by retry never trips it.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use pq_core::{BreakerConfig, Error, Result};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}

impl std::fmt::Display for CircuitState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CircuitState::Closed => write!(f, "CLOSED"),
			CircuitState::Open => write!(f, "OPEN"),
			CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
		}
	}
}

struct BreakerInner {
	state: CircuitState,
	failures: u32,
	half_open_successes: u32,
	last_failure: Option<Instant>,
	trips: u64,
	rejected: u64,
}

/// Raw counters for health-check reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
	pub state: CircuitState,
	pub failures: u32,
	pub half_open_successes: u32,
	pub last_failure_ms_ago: Option<u64>,
	pub trips: u64,
	pub rejected: u64,
}

/// Fault-tolerance state machine shedding load from a failing backend.
pub struct CircuitBreaker {
	config: BreakerConfig,
	inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
	pub fn new(config: BreakerConfig) -> Self {
		Self {
			config,
			inner: Mutex::new(BreakerInner {
				state: CircuitState::Closed,
				failures: 0,
				half_open_successes: 0,
				last_failure: None,
				trips: 0,
				rejected: 0,
			}),
		}
	}

	/// Runs `operation` if the circuit admits it, recording the outcome.
	pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		self.admit()?;
		match operation().await {
			Ok(value) => {
				self.on_success();
				Ok(value)
			}
			Err(err) => {
				self.on_failure();
				Err(err)
			}
		}
	}

	fn admit(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		match inner.state {
			CircuitState::Closed => Ok(()),
			CircuitState::HalfOpen => {
				debug!(target = "pq.breaker", "admitting half-open trial");
				Ok(())
			}
			CircuitState::Open => {
				let elapsed = inner.last_failure.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
				if elapsed >= self.config.reset_timeout() {
					inner.state = CircuitState::HalfOpen;
					inner.half_open_successes = 0;
					info!(target = "pq.breaker", "reset window elapsed, circuit half-open");
					Ok(())
				} else {
					inner.rejected += 1;
					let retry_after_ms = (self.config.reset_timeout() - elapsed).as_millis() as u64;
					Err(Error::CircuitOpen { retry_after_ms })
				}
			}
		}
	}

	fn on_success(&self) {
		let mut inner = self.inner.lock();
		match inner.state {
			CircuitState::Closed => {
				inner.failures = 0;
			}
			CircuitState::HalfOpen => {
				inner.half_open_successes += 1;
				if inner.half_open_successes >= self.config.half_open_requests {
					inner.state = CircuitState::Closed;
					inner.failures = 0;
					inner.half_open_successes = 0;
					info!(target = "pq.breaker", "trial quota met, circuit closed");
				}
			}
			// A straggler admitted before the trip; the cooldown clock is
			// owned by the failure that opened the circuit.
			CircuitState::Open => {}
		}
	}

	fn on_failure(&self) {
		let mut inner = self.inner.lock();
		match inner.state {
			CircuitState::Closed => {
				inner.failures += 1;
				inner.last_failure = Some(Instant::now());
				if inner.failures >= self.config.failure_threshold {
					inner.state = CircuitState::Open;
					inner.trips += 1;
					warn!(
						target = "pq.breaker",
						failures = inner.failures,
						reset_timeout_ms = self.config.reset_timeout_ms,
						"failure threshold reached, circuit open"
					);
				}
			}
			CircuitState::HalfOpen => {
				inner.state = CircuitState::Open;
				inner.last_failure = Some(Instant::now());
				inner.trips += 1;
				warn!(target = "pq.breaker", "trial failed, circuit re-opened");
			}
			CircuitState::Open => {}
		}
	}

	pub fn state(&self) -> CircuitState {
		self.inner.lock().state
	}

	pub fn stats(&self) -> BreakerStats {
		let inner = self.inner.lock();
		BreakerStats {
			state: inner.state,
			failures: inner.failures,
			half_open_successes: inner.half_open_successes,
			last_failure_ms_ago: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
			trips: inner.trips,
			rejected: inner.rejected,
		}
	}

	/// Forces the circuit back to CLOSED with zeroed counters.
	pub fn reset(&self) {
		let mut inner = self.inner.lock();
		inner.state = CircuitState::Closed;
		inner.failures = 0;
		inner.half_open_successes = 0;
		inner.last_failure = None;
		info!(target = "pq.breaker", "circuit reset");
	}
}
