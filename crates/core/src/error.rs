//! Error taxonomy shared across the pool and resilience layers.
//!
//! Every failure that can reach the orchestration boundary carries a stable
//! machine-readable kind, and where a cooldown applies, a retry-after hint.
//! The enum is `Clone` with string payloads so coalesced callers can share a
//! settled failure without wrapping it.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for automation calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
	/// No session became available before the acquisition deadline.
	#[error("pool exhausted: no session became available within {waited_ms}ms")]
	PoolExhausted { waited_ms: u64 },

	/// The backend worker process could not be started.
	#[error("worker launch failed: {0}")]
	WorkerCreationFailed(String),

	/// Session hardening or pre-task navigation failed after a slot was held.
	#[error("session setup failed: {0}")]
	SessionSetupFailed(String),

	/// A single automation attempt exceeded its time bound.
	#[error("task timed out after {timeout_ms}ms")]
	TaskTimeout { timeout_ms: u64 },

	/// A failure matching a transient signature (crash, disconnect, reset).
	#[error("transient task failure: {0}")]
	TaskTransient(String),

	/// A non-retryable task failure, e.g. malformed input.
	#[error("task failed: {0}")]
	TaskFatal(String),

	/// The circuit breaker is open; callers should back off.
	#[error("service unavailable, retry after {retry_after_ms}ms")]
	CircuitOpen { retry_after_ms: u64 },
}

impl Error {
	/// Stable machine-readable kind for boundary translation.
	pub fn kind(&self) -> &'static str {
		match self {
			Error::PoolExhausted { .. } => "pool_exhausted",
			Error::WorkerCreationFailed(_) => "worker_creation_failed",
			Error::SessionSetupFailed(_) => "session_setup_failed",
			Error::TaskTimeout { .. } => "task_timeout",
			Error::TaskTransient(_) => "task_transient",
			Error::TaskFatal(_) => "task_fatal",
			Error::CircuitOpen { .. } => "circuit_open",
		}
	}

	/// Cooldown hint for callers that want to retry later, where one applies.
	pub fn retry_after_ms(&self) -> Option<u64> {
		match self {
			Error::CircuitOpen { retry_after_ms } => Some(*retry_after_ms),
			_ => None,
		}
	}

	/// Whether this error is inherently transient regardless of configured
	/// retry signatures. Signature matching widens this set; it never
	/// narrows it.
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::TaskTimeout { .. } | Error::TaskTransient(_))
	}
}
