//! Composition root for the automation pipeline.
//!
//! A [`QuoteEngine`] is a long-lived instance owned by the process and
//! passed by reference to request handlers. It composes the layers as
//! `cache → dedupe → breaker → retry → timeout → pool`: a cache hit
//! short-circuits entirely, a miss is coalesced against concurrent
//! identical misses, and the breaker sees one aggregate outcome per
//! logical call so a transient failure recovered by retry never trips it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use pq_core::{EngineConfig, Result, RetryConfig, fingerprint};
use pq_pool::{AutomationTask, PoolStats, WorkerBackend, WorkerPool};
use pq_resilience::{BreakerStats, Cache, CacheStats, CircuitBreaker, Deduplicator, with_retry, with_timeout};

/// Aggregated counters for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
	pub pool: PoolStats,
	pub breaker: BreakerStats,
	pub cache: CacheStats,
	pub inflight: usize,
}

/// Long-lived pipeline instance wrapping a worker pool.
pub struct QuoteEngine {
	pool: WorkerPool,
	cache: Cache<Value>,
	dedupe: Deduplicator<Value>,
	breaker: CircuitBreaker,
	retry: RetryConfig,
	task_timeout: Duration,
}

impl QuoteEngine {
	pub fn new(config: EngineConfig, backend: Arc<dyn WorkerBackend>) -> Self {
		let task_timeout = config.pool.default_timeout();
		Self {
			pool: WorkerPool::new(config.pool, backend),
			cache: Cache::new(&config.cache),
			dedupe: Deduplicator::new(),
			breaker: CircuitBreaker::new(config.breaker),
			retry: config.retry,
			task_timeout,
		}
	}

	/// Ensures at least one worker is running.
	pub async fn warmup(&self) -> Result<()> {
		self.pool.warmup().await
	}

	/// Runs `task` for the given request parameters through the full
	/// pipeline and caches the successful result.
	pub async fn execute(&self, params: &[(String, String)], task: Arc<dyn AutomationTask>) -> Result<Value> {
		let key = fingerprint(params.iter().map(|(name, value)| (name.as_str(), value.as_str())));

		if let Some(hit) = self.cache.get(&key) {
			debug!(target = "pq.engine", key = %key, "cache hit");
			return Ok(hit);
		}

		let value = self.dedupe.dedupe(&key, || self.run_pipeline(task)).await?;
		self.cache.set(&key, value.clone());
		Ok(value)
	}

	async fn run_pipeline(&self, task: Arc<dyn AutomationTask>) -> Result<Value> {
		self.breaker
			.execute(|| {
				let pool = self.pool.clone();
				let timeout = self.task_timeout;
				with_retry_owned(self.retry.clone(), pool, task, timeout)
			})
			.await
	}

	pub fn stats(&self) -> EngineStats {
		EngineStats {
			pool: self.pool.stats(),
			breaker: self.breaker.stats(),
			cache: self.cache.stats(),
			inflight: self.dedupe.inflight_count(),
		}
	}

	/// Shuts the pool down. Breaker and cache state is per-process and
	/// simply discarded.
	pub async fn close(&self) {
		self.pool.close().await;
	}
}

/// One breaker-visible call: all retry attempts of a time-boxed leased
/// task execution. Each attempt leases its own session and releases it on
/// its own completion path, so an attempt abandoned by the timeout still
/// returns its slot when it eventually finishes.
async fn with_retry_owned(retry: RetryConfig, pool: WorkerPool, task: Arc<dyn AutomationTask>, timeout: Duration) -> Result<Value> {
	with_retry(&retry, || {
		let pool = pool.clone();
		let task = Arc::clone(&task);
		with_timeout(timeout, async move {
			let lease = pool.acquire().await?;
			let outcome = task.run(lease.session()).await;
			lease.release().await;
			outcome
		})
	})
	.await
}
