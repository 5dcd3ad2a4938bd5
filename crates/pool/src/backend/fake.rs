//! In-memory worker backend for unit and integration tests.
//!
//! Mirrors the real backend's contract without processes: launches and
//! session opens succeed instantly unless the controller scripts failures,
//! and workers can be disconnected on demand to exercise crash eviction.
//!
//! # Example
//!
//! ```ignore
//! let (backend, controller) = FakeBackend::new();
//! let pool = WorkerPool::new(PoolConfig::default(), Arc::new(backend));
//!
//! controller.fail_next_launches(1);
//! assert!(pool.acquire().await.is_err());
//! assert!(pool.acquire().await.is_ok());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pq_core::{Error, Result};

use super::{SessionHandle, WorkerBackend, WorkerHandle};
use crate::session::SessionPolicy;

struct FakeState {
	launches: AtomicUsize,
	sessions_opened: AtomicUsize,
	launch_failures: AtomicUsize,
	session_failures: AtomicUsize,
	launch_delay_ms: AtomicU64,
	workers: Mutex<Vec<Arc<FakeWorkerState>>>,
}

impl FakeState {
	fn take_scripted_failure(counter: &AtomicUsize) -> bool {
		counter
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
			.is_ok()
	}
}

struct FakeWorkerState {
	index: usize,
	alive: AtomicBool,
	open_sessions: AtomicUsize,
}

/// Backend half handed to the pool.
pub struct FakeBackend {
	state: Arc<FakeState>,
}

/// Controller half kept by the test for scripting and assertions.
pub struct FakeController {
	state: Arc<FakeState>,
}

impl FakeBackend {
	/// Builds the backend and its controller.
	pub fn new() -> (Self, FakeController) {
		let state = Arc::new(FakeState {
			launches: AtomicUsize::new(0),
			sessions_opened: AtomicUsize::new(0),
			launch_failures: AtomicUsize::new(0),
			session_failures: AtomicUsize::new(0),
			launch_delay_ms: AtomicU64::new(0),
			workers: Mutex::new(Vec::new()),
		});
		(
			Self {
				state: Arc::clone(&state),
			},
			FakeController { state },
		)
	}
}

#[async_trait]
impl WorkerBackend for FakeBackend {
	async fn launch(&self) -> Result<Box<dyn WorkerHandle>> {
		let delay_ms = self.state.launch_delay_ms.load(Ordering::SeqCst);
		if delay_ms > 0 {
			tokio::time::sleep(Duration::from_millis(delay_ms)).await;
		}
		if FakeState::take_scripted_failure(&self.state.launch_failures) {
			return Err(Error::WorkerCreationFailed("scripted launch failure".to_string()));
		}

		let index = self.state.launches.fetch_add(1, Ordering::SeqCst);
		let worker = Arc::new(FakeWorkerState {
			index,
			alive: AtomicBool::new(true),
			open_sessions: AtomicUsize::new(0),
		});
		self.state.workers.lock().push(Arc::clone(&worker));
		Ok(Box::new(FakeWorker {
			backend: Arc::clone(&self.state),
			worker,
		}))
	}
}

struct FakeWorker {
	backend: Arc<FakeState>,
	worker: Arc<FakeWorkerState>,
}

#[async_trait]
impl WorkerHandle for FakeWorker {
	async fn open_session(&self, _policy: &SessionPolicy) -> Result<Box<dyn SessionHandle>> {
		if !self.worker.alive.load(Ordering::SeqCst) {
			return Err(Error::SessionSetupFailed("worker disconnected".to_string()));
		}
		if FakeState::take_scripted_failure(&self.backend.session_failures) {
			return Err(Error::SessionSetupFailed("scripted hardening failure".to_string()));
		}

		let serial = self.backend.sessions_opened.fetch_add(1, Ordering::SeqCst);
		self.worker.open_sessions.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(FakeSession {
			endpoint: format!("fake://worker-{}/session-{serial}", self.worker.index),
			worker: Arc::clone(&self.worker),
		}))
	}

	fn is_alive(&self) -> bool {
		self.worker.alive.load(Ordering::SeqCst)
	}

	async fn close(&self) {
		self.worker.alive.store(false, Ordering::SeqCst);
	}
}

struct FakeSession {
	endpoint: String,
	worker: Arc<FakeWorkerState>,
}

#[async_trait]
impl SessionHandle for FakeSession {
	fn endpoint(&self) -> &str {
		&self.endpoint
	}

	async fn close(&self) -> Result<()> {
		self.worker.open_sessions.fetch_sub(1, Ordering::SeqCst);
		Ok(())
	}
}

impl FakeController {
	/// Total workers ever launched.
	pub fn launches(&self) -> usize {
		self.state.launches.load(Ordering::SeqCst)
	}

	/// Total sessions ever opened.
	pub fn sessions_opened(&self) -> usize {
		self.state.sessions_opened.load(Ordering::SeqCst)
	}

	/// Fails the next `count` launch attempts.
	pub fn fail_next_launches(&self, count: usize) {
		self.state.launch_failures.store(count, Ordering::SeqCst);
	}

	/// Fails the next `count` session opens.
	pub fn fail_next_sessions(&self, count: usize) {
		self.state.session_failures.store(count, Ordering::SeqCst);
	}

	/// Delays every launch, to widen race windows in tests.
	pub fn set_launch_delay(&self, delay: Duration) {
		self.state.launch_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
	}

	/// Simulates a crash of the `index`-th launched worker. Returns
	/// whether such a worker existed.
	pub fn disconnect(&self, index: usize) -> bool {
		let workers = self.state.workers.lock();
		match workers.iter().find(|w| w.index == index) {
			Some(worker) => {
				worker.alive.store(false, Ordering::SeqCst);
				true
			}
			None => false,
		}
	}

	/// Workers still reporting alive.
	pub fn live_workers(&self) -> usize {
		self.state.workers.lock().iter().filter(|w| w.alive.load(Ordering::SeqCst)).count()
	}

	/// Sessions currently open across all workers.
	pub fn open_sessions(&self) -> usize {
		self.state.workers.lock().iter().map(|w| w.open_sessions.load(Ordering::SeqCst)).sum()
	}
}
