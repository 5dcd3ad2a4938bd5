//! Recognized configuration surface for the pool and resilience layers.
//!
//! All sections deserialize from camelCase JSON with per-field defaults, so
//! partial files parse and an absent file falls back to defaults entirely.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Worker pool sizing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
	/// Maximum number of concurrently live worker processes.
	pub max_workers: usize,
	/// Maximum concurrent leased sessions per worker.
	pub max_sessions_per_worker: usize,
	/// How long `acquire` waits on the queue before failing.
	pub acquire_timeout_ms: u64,
	/// Idle window after which a session-free worker is evicted.
	pub worker_idle_timeout_ms: u64,
	/// Interval of the background eviction sweep.
	pub sweep_interval_ms: u64,
	/// Accepted for config compatibility; sessions are single-use and never idle.
	pub session_idle_timeout_ms: u64,
	/// Navigation bound applied to hardened sessions.
	pub navigation_timeout_ms: u64,
	/// Default per-attempt bound for automation tasks.
	pub default_timeout_ms: u64,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_workers: 2,
			max_sessions_per_worker: 4,
			acquire_timeout_ms: 30_000,
			worker_idle_timeout_ms: 300_000,
			sweep_interval_ms: 30_000,
			session_idle_timeout_ms: 60_000,
			navigation_timeout_ms: 30_000,
			default_timeout_ms: 15_000,
		}
	}
}

impl PoolConfig {
	pub fn acquire_timeout(&self) -> Duration {
		Duration::from_millis(self.acquire_timeout_ms)
	}

	pub fn worker_idle_timeout(&self) -> Duration {
		Duration::from_millis(self.worker_idle_timeout_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	pub fn default_timeout(&self) -> Duration {
		Duration::from_millis(self.default_timeout_ms)
	}
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerConfig {
	/// Consecutive failures in CLOSED that trip the circuit.
	pub failure_threshold: u32,
	/// Cooldown before an OPEN circuit admits a trial call.
	pub reset_timeout_ms: u64,
	/// Trial successes required to close a HALF_OPEN circuit.
	pub half_open_requests: u32,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			reset_timeout_ms: 60_000,
			half_open_requests: 2,
		}
	}
}

impl BreakerConfig {
	pub fn reset_timeout(&self) -> Duration {
		Duration::from_millis(self.reset_timeout_ms)
	}
}

/// Retry attempts and backoff shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
	/// Total attempts including the first.
	pub max_attempts: u32,
	/// Delay before the first retry.
	pub initial_delay_ms: u64,
	/// Cap on the exponential delay.
	pub max_delay_ms: u64,
	/// Multiplier applied to the delay after each failed attempt.
	pub backoff_multiplier: f64,
	/// Transient-failure signatures matched against error text.
	pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay_ms: 500,
			max_delay_ms: 5_000,
			backoff_multiplier: 2.0,
			retryable_errors: vec![
				"timed out".to_string(),
				"timeout".to_string(),
				"connection reset".to_string(),
				"connection refused".to_string(),
				"disconnected".to_string(),
				"crashed".to_string(),
				"target closed".to_string(),
				"browser has been closed".to_string(),
			],
		}
	}
}

/// Result cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
	/// Capacity bound; inserting beyond it evicts the oldest entry.
	pub max_entries: usize,
	/// Entry lifetime; expired entries read as absent.
	pub ttl_ms: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			max_entries: 200,
			ttl_ms: 300_000,
		}
	}
}

impl CacheConfig {
	pub fn ttl(&self) -> Duration {
		Duration::from_millis(self.ttl_ms)
	}
}

/// Aggregate configuration for a composed engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
	pub pool: PoolConfig,
	pub breaker: BreakerConfig,
	pub retry: RetryConfig,
	pub cache: CacheConfig,
}

impl EngineConfig {
	/// Loads configuration from a JSON file, falling back to defaults when
	/// the file is absent or unreadable. A file that exists but fails to
	/// parse is reported and ignored rather than aborting startup.
	pub fn load(path: &Path) -> Self {
		let Ok(content) = std::fs::read_to_string(path) else {
			return Self::default();
		};
		match serde_json::from_str(&content) {
			Ok(config) => config,
			Err(err) => {
				warn!(target = "pq.config", path = %path.display(), error = %err, "ignoring unparseable config file");
				Self::default()
			}
		}
	}
}
