//! Pool admission, fairness, and eviction behavior against the fake backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use pq_core::PoolConfig;
use pq_pool::{FakeBackend, FakeController, WorkerPool};

fn pool_with(config: PoolConfig) -> (WorkerPool, FakeController) {
	let (backend, controller) = FakeBackend::new();
	(WorkerPool::new(config, Arc::new(backend)), controller)
}

fn small_pool(max_workers: usize, max_sessions_per_worker: usize) -> (WorkerPool, FakeController) {
	pool_with(PoolConfig {
		max_workers,
		max_sessions_per_worker,
		acquire_timeout_ms: 2_000,
		sweep_interval_ms: 0,
		..PoolConfig::default()
	})
}

async fn wait_for_pending(pool: &WorkerPool, pending: usize) {
	while pool.stats().pending_waiters < pending {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn leases_never_exceed_total_capacity() {
	let (pool, _controller) = small_pool(2, 2);
	let current = Arc::new(AtomicUsize::new(0));
	let peak = Arc::new(AtomicUsize::new(0));

	let mut tasks = Vec::new();
	for _ in 0..8 {
		let pool = pool.clone();
		let current = Arc::clone(&current);
		let peak = Arc::clone(&peak);
		tasks.push(tokio::spawn(async move {
			let lease = pool.acquire().await.expect("acquire should succeed within the deadline");
			let now = current.fetch_add(1, Ordering::SeqCst) + 1;
			peak.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(10)).await;
			current.fetch_sub(1, Ordering::SeqCst);
			lease.release().await;
		}));
	}
	for task in tasks {
		task.await.expect("lease task should not panic");
	}

	assert!(peak.load(Ordering::SeqCst) <= 4, "peak {} exceeded capacity", peak.load(Ordering::SeqCst));
	assert_eq!(pool.stats().active_sessions, 0);
}

#[tokio::test]
async fn release_unblocks_waiters_in_fifo_order() {
	let (pool, _controller) = small_pool(1, 1);
	let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

	let first = pool.acquire().await.expect("first acquire should succeed");

	let second = tokio::spawn({
		let pool = pool.clone();
		let order = Arc::clone(&order);
		async move {
			let lease = pool.acquire().await.expect("second acquire should succeed");
			order.lock().push("second");
			lease.release().await;
		}
	});
	wait_for_pending(&pool, 1).await;

	let third = tokio::spawn({
		let pool = pool.clone();
		let order = Arc::clone(&order);
		async move {
			let lease = pool.acquire().await.expect("third acquire should succeed");
			order.lock().push("third");
			lease.release().await;
		}
	});
	wait_for_pending(&pool, 2).await;

	first.release().await;
	second.await.expect("second waiter should not panic");
	third.await.expect("third waiter should not panic");

	assert_eq!(*order.lock(), vec!["second", "third"]);
}

#[tokio::test]
async fn exhausted_wait_deadline_fails_with_pool_exhausted() {
	let (pool, _controller) = pool_with(PoolConfig {
		max_workers: 1,
		max_sessions_per_worker: 1,
		acquire_timeout_ms: 50,
		sweep_interval_ms: 0,
		..PoolConfig::default()
	});

	let held = pool.acquire().await.expect("first acquire should succeed");
	let err = pool.acquire().await.expect_err("second acquire should hit the deadline");
	assert_eq!(err.kind(), "pool_exhausted");
	assert_eq!(pool.stats().pending_waiters, 0);

	held.release().await;
	assert!(pool.acquire().await.is_ok(), "capacity should be free after the failed wait");
}

#[tokio::test]
async fn launch_failure_releases_reserved_capacity() {
	let (pool, controller) = small_pool(1, 1);
	controller.fail_next_launches(1);

	let err = pool.acquire().await.expect_err("scripted launch should fail");
	assert_eq!(err.kind(), "worker_creation_failed");
	let stats = pool.stats();
	assert_eq!(stats.total_workers, 0);
	assert_eq!(stats.active_sessions, 0);

	let lease = pool.acquire().await.expect("next acquire should launch cleanly");
	assert_eq!(controller.launches(), 1);
	lease.release().await;
}

#[tokio::test]
async fn session_failure_releases_the_held_slot() {
	let (pool, controller) = small_pool(1, 1);
	controller.fail_next_sessions(1);

	let err = pool.acquire().await.expect_err("scripted session open should fail");
	assert_eq!(err.kind(), "session_setup_failed");
	assert_eq!(pool.stats().active_sessions, 0);

	let lease = pool.acquire().await.expect("slot should be free again");
	assert_eq!(pool.stats().active_sessions, 1);
	lease.release().await;
}

#[tokio::test]
async fn disconnected_worker_is_removed_immediately() {
	let (pool, controller) = small_pool(1, 2);
	let lease = pool.acquire().await.expect("acquire should succeed");
	let worker = lease.session().worker();
	assert_eq!(pool.stats().total_workers, 1);

	controller.disconnect(0);
	pool.notify_disconnected(worker);
	assert_eq!(pool.stats().total_workers, 0);

	// The lost lease still releases without touching live bookkeeping.
	lease.release().await;
	assert_eq!(pool.stats().active_sessions, 0);

	let replacement = pool.acquire().await.expect("a fresh worker should launch");
	assert_eq!(controller.launches(), 2);
	replacement.release().await;
}

#[tokio::test]
async fn dead_worker_found_during_reservation_is_skipped() {
	let (pool, controller) = small_pool(2, 1);
	let lease = pool.acquire().await.expect("acquire should succeed");
	lease.release().await;

	controller.disconnect(0);
	let lease = pool.acquire().await.expect("acquire should launch a replacement");
	assert_eq!(controller.launches(), 2);
	assert_eq!(pool.stats().total_workers, 1);
	lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn idle_worker_is_swept_after_timeout() {
	let (pool, controller) = pool_with(PoolConfig {
		max_workers: 1,
		max_sessions_per_worker: 1,
		worker_idle_timeout_ms: 100,
		sweep_interval_ms: 50,
		..PoolConfig::default()
	});

	let lease = pool.acquire().await.expect("acquire should succeed");
	lease.release().await;
	assert_eq!(pool.stats().total_workers, 1);

	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(pool.stats().total_workers, 0);
	tokio::task::yield_now().await;
	assert_eq!(controller.live_workers(), 0);
}

#[tokio::test(start_paused = true)]
async fn worker_with_active_session_is_not_swept() {
	let (pool, _controller) = pool_with(PoolConfig {
		max_workers: 1,
		max_sessions_per_worker: 1,
		worker_idle_timeout_ms: 100,
		sweep_interval_ms: 50,
		..PoolConfig::default()
	});

	let lease = pool.acquire().await.expect("acquire should succeed");
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(pool.stats().total_workers, 1);
	lease.release().await;
}

#[tokio::test]
async fn concurrent_acquires_during_a_slow_launch_do_not_overshoot() {
	let (pool, controller) = small_pool(1, 2);
	controller.set_launch_delay(Duration::from_millis(50));

	// Both callers race while the single allowed launch is in flight; the
	// second must wait for the fresh worker's spare slot, not launch again.
	let (first, second) = tokio::join!(
		{
			let pool = pool.clone();
			async move { pool.acquire().await }
		},
		{
			let pool = pool.clone();
			async move { pool.acquire().await }
		},
	);

	let first = first.expect("first acquire should succeed");
	let second = second.expect("second acquire should ride the same worker");
	assert_eq!(controller.launches(), 1);
	assert_eq!(first.session().worker(), second.session().worker());
	first.release().await;
	second.release().await;
}

#[tokio::test]
async fn warmup_is_idempotent() {
	let (pool, controller) = small_pool(2, 2);
	pool.warmup().await.expect("warmup should succeed");
	pool.warmup().await.expect("repeat warmup should be a no-op");

	assert_eq!(controller.launches(), 1);
	let stats = pool.stats();
	assert_eq!(stats.total_workers, 1);
	assert_eq!(stats.active_sessions, 0);
}

#[tokio::test]
async fn dropped_lease_returns_the_slot() {
	let (pool, _controller) = small_pool(1, 1);
	let lease = pool.acquire().await.expect("acquire should succeed");
	drop(lease);
	tokio::task::yield_now().await;

	assert_eq!(pool.stats().active_sessions, 0);
	let lease = pool.acquire().await.expect("slot should be reusable after drop");
	lease.release().await;
}

#[tokio::test]
async fn close_fails_pending_waiters_and_rejects_new_acquires() {
	let (pool, _controller) = small_pool(1, 1);
	let held = pool.acquire().await.expect("first acquire should succeed");

	let waiter = tokio::spawn({
		let pool = pool.clone();
		async move { pool.acquire().await }
	});
	wait_for_pending(&pool, 1).await;

	pool.close().await;
	let err = waiter.await.expect("waiter should not panic").expect_err("queued acquire should fail on close");
	assert_eq!(err.kind(), "pool_exhausted");

	assert!(pool.acquire().await.is_err(), "closed pool should reject acquires");
	drop(held);
}

#[tokio::test]
async fn sessions_are_torn_down_on_release_not_reused() {
	let (pool, controller) = small_pool(1, 1);

	let first = pool.acquire().await.expect("first acquire should succeed");
	let first_endpoint = first.session().endpoint().to_string();
	first.release().await;

	let second = pool.acquire().await.expect("second acquire should succeed");
	assert_ne!(first_endpoint, second.session().endpoint(), "sessions must not be reused");
	assert_eq!(controller.sessions_opened(), 2);
	assert_eq!(controller.open_sessions(), 1);
	second.release().await;
	assert_eq!(controller.open_sessions(), 0);
	assert_eq!(controller.launches(), 1, "the worker itself is reused");
}

#[tokio::test]
async fn stats_reflect_configured_bounds() {
	let (pool, _controller) = small_pool(3, 5);
	let stats = pool.stats();
	assert_eq!(stats.max_workers, 3);
	assert_eq!(stats.max_sessions_per_worker, 5);
	assert_eq!(stats.total_workers, 0);
	assert_eq!(stats.pending_waiters, 0);
}
