//! In-flight request coalescing keyed by fingerprint.
//!
//! The first caller for a key executes the operation; concurrent callers
//! with the same key join it and observe the same settled outcome, success
//! or failure. The in-flight entry is removed unconditionally when the
//! execution settles, so the next call starts fresh. The map is generic
//! over the value type and reusable beyond this subsystem.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use pq_core::{Error, Result};

type Settled<V> = Option<Result<V>>;

/// Coalesces concurrent identical calls into one execution.
pub struct Deduplicator<V> {
	inner: Mutex<HashMap<String, watch::Receiver<Settled<V>>>>,
}

enum Role<V> {
	Leader(watch::Sender<Settled<V>>),
	Joiner(watch::Receiver<Settled<V>>),
}

impl<V: Clone + Send + Sync> Deduplicator<V> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(HashMap::new()),
		}
	}

	/// Runs `op` for this key, or joins an execution already in flight.
	pub async fn dedupe<F, Fut>(&self, key: &str, op: F) -> Result<V>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V>>,
	{
		let role = {
			let mut inflight = self.inner.lock();
			match inflight.get(key) {
				Some(rx) => Role::Joiner(rx.clone()),
				None => {
					let (tx, rx) = watch::channel(None);
					inflight.insert(key.to_string(), rx);
					Role::Leader(tx)
				}
			}
		};

		match role {
			Role::Joiner(rx) => {
				debug!(target = "pq.dedupe", key, "joining in-flight execution");
				self.join(rx).await
			}
			Role::Leader(tx) => {
				// The guard removes the entry even if this future is
				// dropped mid-execution, so the key cannot wedge.
				let guard = FlightGuard { inner: &self.inner, key };
				let result = op().await;
				drop(guard);
				let _ = tx.send(Some(result.clone()));
				result
			}
		}
	}

	async fn join(&self, mut rx: watch::Receiver<Settled<V>>) -> Result<V> {
		loop {
			if let Some(result) = rx.borrow_and_update().as_ref() {
				return result.clone();
			}
			if rx.changed().await.is_err() {
				let settled = rx.borrow().clone();
				return match settled {
					Some(result) => result,
					None => Err(Error::TaskTransient("coalesced execution abandoned before settling".to_string())),
				};
			}
		}
	}

	/// Whether an execution for this key is currently in flight.
	pub fn is_in_flight(&self, key: &str) -> bool {
		self.inner.lock().contains_key(key)
	}

	/// Number of in-flight executions.
	pub fn inflight_count(&self) -> usize {
		self.inner.lock().len()
	}
}

impl<V: Clone + Send + Sync> Default for Deduplicator<V> {
	fn default() -> Self {
		Self::new()
	}
}

struct FlightGuard<'a, V> {
	inner: &'a Mutex<HashMap<String, watch::Receiver<Settled<V>>>>,
	key: &'a str,
}

impl<V> Drop for FlightGuard<'_, V> {
	fn drop(&mut self) {
		self.inner.lock().remove(self.key);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use tokio::sync::Notify;

	use super::*;

	#[tokio::test]
	async fn concurrent_calls_share_one_execution() {
		let dedupe = Arc::new(Deduplicator::<u32>::new());
		let runs = Arc::new(AtomicUsize::new(0));
		let gate = Arc::new(Notify::new());

		let leader = tokio::spawn({
			let dedupe = Arc::clone(&dedupe);
			let runs = Arc::clone(&runs);
			let gate = Arc::clone(&gate);
			async move {
				dedupe
					.dedupe("X", || async {
						runs.fetch_add(1, Ordering::SeqCst);
						gate.notified().await;
						Ok(42)
					})
					.await
			}
		});

		// Wait until the leader has registered its flight.
		while !dedupe.is_in_flight("X") {
			tokio::task::yield_now().await;
		}

		let joiner = tokio::spawn({
			let dedupe = Arc::clone(&dedupe);
			let runs = Arc::clone(&runs);
			async move {
				dedupe
					.dedupe("X", || async {
						runs.fetch_add(1, Ordering::SeqCst);
						Ok(99)
					})
					.await
			}
		});

		// Let the joiner attach before releasing the leader.
		tokio::task::yield_now().await;
		gate.notify_one();

		let a = leader.await.expect("leader should not panic");
		let b = joiner.await.expect("joiner should not panic");
		assert_eq!(a, Ok(42));
		assert_eq!(b, Ok(42));
		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn joiners_observe_the_shared_failure() {
		let dedupe = Arc::new(Deduplicator::<u32>::new());
		let gate = Arc::new(Notify::new());

		let leader = tokio::spawn({
			let dedupe = Arc::clone(&dedupe);
			let gate = Arc::clone(&gate);
			async move {
				dedupe
					.dedupe("X", || async {
						gate.notified().await;
						Err::<u32, _>(Error::TaskFatal("boom".to_string()))
					})
					.await
			}
		});

		while !dedupe.is_in_flight("X") {
			tokio::task::yield_now().await;
		}

		let joiner = tokio::spawn({
			let dedupe = Arc::clone(&dedupe);
			async move { dedupe.dedupe("X", || async { Ok(1) }).await }
		});

		tokio::task::yield_now().await;
		gate.notify_one();

		let a = leader.await.expect("leader should not panic");
		let b = joiner.await.expect("joiner should not panic");
		assert_eq!(a, Err(Error::TaskFatal("boom".to_string())));
		assert_eq!(b, Err(Error::TaskFatal("boom".to_string())));
	}

	#[tokio::test]
	async fn entry_is_removed_after_settlement() {
		let dedupe = Deduplicator::<u32>::new();
		let _ = dedupe.dedupe("X", || async { Ok(1) }).await;
		assert!(!dedupe.is_in_flight("X"));
		assert_eq!(dedupe.inflight_count(), 0);
	}

	#[tokio::test]
	async fn sequential_calls_each_execute() {
		let dedupe = Deduplicator::<u32>::new();
		let runs = AtomicUsize::new(0);
		for _ in 0..2 {
			let result = dedupe
				.dedupe("X", || async {
					runs.fetch_add(1, Ordering::SeqCst);
					Ok(7)
				})
				.await;
			assert_eq!(result, Ok(7));
		}
		assert_eq!(runs.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn distinct_keys_do_not_coalesce() {
		let dedupe = Arc::new(Deduplicator::<u32>::new());
		let runs = Arc::new(AtomicUsize::new(0));
		let (a, b) = tokio::join!(
			dedupe.dedupe("A", {
				let runs = Arc::clone(&runs);
				|| async move {
					runs.fetch_add(1, Ordering::SeqCst);
					Ok(1)
				}
			}),
			dedupe.dedupe("B", {
				let runs = Arc::clone(&runs);
				|| async move {
					runs.fetch_add(1, Ordering::SeqCst);
					Ok(2)
				}
			}),
		);
		assert_eq!(a, Ok(1));
		assert_eq!(b, Ok(2));
		assert_eq!(runs.load(Ordering::SeqCst), 2);
	}
}
