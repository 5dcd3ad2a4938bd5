//! Pool admission control, wait queue, and eviction.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
// Pool timing uses the tokio clock so timer-driven tests can pause it.
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pq_core::{Error, PoolConfig, Result};

use crate::backend::{WorkerBackend, WorkerHandle};
use crate::session::{LeasedSession, Session, SessionPolicy};

/// Pool-unique worker identity.
pub type WorkerId = u64;

/// Snapshot of pool occupancy for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
	pub total_workers: usize,
	pub active_sessions: usize,
	pub pending_waiters: usize,
	pub max_workers: usize,
	pub max_sessions_per_worker: usize,
}

struct WorkerEntry {
	id: WorkerId,
	handle: Arc<dyn WorkerHandle>,
	created_at: Instant,
	last_used: Instant,
	active_sessions: usize,
}

struct Waiter {
	ticket: u64,
	tx: oneshot::Sender<Reservation>,
}

/// A slot claimed under the lock, redeemed outside it.
enum Reservation {
	/// Capacity on an existing worker; its active count is already bumped.
	Slot { worker: WorkerId, handle: Arc<dyn WorkerHandle> },
	/// Permission to launch a new worker; `launching` is already bumped.
	Launch,
}

struct PoolInner {
	workers: Vec<WorkerEntry>,
	launching: usize,
	waiters: VecDeque<Waiter>,
	next_worker_id: WorkerId,
	next_ticket: u64,
	closed: bool,
}

/// Bounded worker pool. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkerPool {
	shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
	config: PoolConfig,
	policy: SessionPolicy,
	backend: Arc<dyn WorkerBackend>,
	inner: Mutex<PoolInner>,
}

enum Admission {
	Reserved(Reservation),
	Queued(u64),
}

impl WorkerPool {
	/// Creates a pool with the default hardening policy derived from
	/// `config` and starts the background eviction sweep.
	pub fn new(config: PoolConfig, backend: Arc<dyn WorkerBackend>) -> Self {
		let policy = SessionPolicy::from_config(&config);
		Self::with_policy(config, policy, backend)
	}

	/// Creates a pool with an explicit session hardening policy.
	pub fn with_policy(config: PoolConfig, policy: SessionPolicy, backend: Arc<dyn WorkerBackend>) -> Self {
		let pool = Self {
			shared: Arc::new(PoolShared {
				config,
				policy,
				backend,
				inner: Mutex::new(PoolInner {
					workers: Vec::new(),
					launching: 0,
					waiters: VecDeque::new(),
					next_worker_id: 0,
					next_ticket: 0,
					closed: false,
				}),
			}),
		};
		spawn_sweeper(&pool.shared);
		pool
	}

	/// Leases a hardened session, waiting up to the configured acquire
	/// timeout when the pool is at capacity.
	pub async fn acquire(&self) -> Result<LeasedSession> {
		let started = Instant::now();
		let (tx, mut rx) = oneshot::channel();

		let admission = {
			let mut inner = self.shared.inner.lock();
			if inner.closed {
				return Err(Error::TaskFatal("pool is closed".to_string()));
			}
			match try_reserve(&self.shared.config, &mut inner) {
				Some(reservation) => Admission::Reserved(reservation),
				None => {
					let ticket = inner.next_ticket;
					inner.next_ticket += 1;
					inner.waiters.push_back(Waiter { ticket, tx });
					debug!(
						target = "pq.pool",
						ticket,
						pending = inner.waiters.len(),
						"no capacity, queued waiter"
					);
					Admission::Queued(ticket)
				}
			}
		};

		let ticket = match admission {
			Admission::Reserved(reservation) => return self.finish_acquire(reservation).await,
			Admission::Queued(ticket) => ticket,
		};

		tokio::select! {
			delivered = &mut rx => match delivered {
				Ok(reservation) => self.finish_acquire(reservation).await,
				Err(_) => Err(Error::PoolExhausted {
					waited_ms: started.elapsed().as_millis() as u64,
				}),
			},
			_ = tokio::time::sleep(self.shared.config.acquire_timeout()) => {
				self.abandon_wait(ticket, &mut rx);
				let waited_ms = started.elapsed().as_millis() as u64;
				warn!(target = "pq.pool", ticket, waited_ms, "acquire deadline elapsed");
				Err(Error::PoolExhausted { waited_ms })
			}
		}
	}

	/// Removes our wait entry after a deadline; if a reservation raced the
	/// deadline it is returned to the pool so no slot is leaked.
	fn abandon_wait(&self, ticket: u64, rx: &mut oneshot::Receiver<Reservation>) {
		let raced = {
			let mut inner = self.shared.inner.lock();
			match inner.waiters.iter().position(|w| w.ticket == ticket) {
				Some(pos) => {
					inner.waiters.remove(pos);
					None
				}
				// Entry already consumed: the reservation is in the channel.
				None => rx.try_recv().ok(),
			}
		};
		if let Some(reservation) = raced {
			let mut inner = self.shared.inner.lock();
			return_reservation(&mut inner, reservation);
			satisfy_waiters(&self.shared.config, &mut inner);
		}
	}

	async fn finish_acquire(&self, reservation: Reservation) -> Result<LeasedSession> {
		match reservation {
			Reservation::Slot { worker, handle } => self.open_session(worker, handle).await,
			Reservation::Launch => match self.shared.backend.launch().await {
				Ok(handle) => {
					let handle: Arc<dyn WorkerHandle> = Arc::from(handle);
					let worker = {
						let mut inner = self.shared.inner.lock();
						inner.launching -= 1;
						let id = inner.next_worker_id;
						inner.next_worker_id += 1;
						inner.workers.push(WorkerEntry {
							id,
							handle: Arc::clone(&handle),
							created_at: Instant::now(),
							last_used: Instant::now(),
							active_sessions: 1,
						});
						// The fresh worker may have spare slots for waiters.
						satisfy_waiters(&self.shared.config, &mut inner);
						id
					};
					info!(target = "pq.pool", worker, "worker launched");
					self.open_session(worker, handle).await
				}
				Err(err) => {
					let mut inner = self.shared.inner.lock();
					inner.launching -= 1;
					satisfy_waiters(&self.shared.config, &mut inner);
					drop(inner);
					warn!(target = "pq.pool", error = %err, "worker launch failed");
					Err(match err {
						Error::WorkerCreationFailed(_) => err,
						other => Error::WorkerCreationFailed(other.to_string()),
					})
				}
			},
		}
	}

	async fn open_session(&self, worker: WorkerId, handle: Arc<dyn WorkerHandle>) -> Result<LeasedSession> {
		match handle.open_session(&self.shared.policy).await {
			Ok(session_handle) => {
				let session = Session::new(worker, session_handle, self.shared.policy.clone());
				debug!(target = "pq.pool", worker, endpoint = session.endpoint(), "session leased");
				Ok(LeasedSession::new(Arc::clone(&self.shared), worker, session))
			}
			Err(err) => {
				warn!(target = "pq.pool", worker, error = %err, "session setup failed, releasing slot");
				self.shared.release_slot(worker);
				Err(match err {
					Error::SessionSetupFailed(_) => err,
					other => Error::SessionSetupFailed(other.to_string()),
				})
			}
		}
	}

	/// Ensures at least one worker exists. Idempotent; concurrent calls
	/// launch at most one.
	pub async fn warmup(&self) -> Result<()> {
		let should_launch = {
			let mut inner = self.shared.inner.lock();
			if inner.closed || self.shared.config.max_workers == 0 || !inner.workers.is_empty() || inner.launching > 0 {
				false
			} else {
				inner.launching += 1;
				true
			}
		};
		if !should_launch {
			return Ok(());
		}

		match self.shared.backend.launch().await {
			Ok(handle) => {
				let mut inner = self.shared.inner.lock();
				inner.launching -= 1;
				let id = inner.next_worker_id;
				inner.next_worker_id += 1;
				inner.workers.push(WorkerEntry {
					id,
					handle: Arc::from(handle),
					created_at: Instant::now(),
					last_used: Instant::now(),
					active_sessions: 0,
				});
				satisfy_waiters(&self.shared.config, &mut inner);
				drop(inner);
				info!(target = "pq.pool", worker = id, "warmup worker launched");
				Ok(())
			}
			Err(err) => {
				let mut inner = self.shared.inner.lock();
				inner.launching -= 1;
				satisfy_waiters(&self.shared.config, &mut inner);
				drop(inner);
				Err(match err {
					Error::WorkerCreationFailed(_) => err,
					other => Error::WorkerCreationFailed(other.to_string()),
				})
			}
		}
	}

	/// Removes a crashed worker immediately, regardless of idle state.
	/// Sessions it held are lost; their tasks surface crash errors through
	/// the backend, which the retry layer classifies as transient.
	pub fn notify_disconnected(&self, worker: WorkerId) {
		let mut inner = self.shared.inner.lock();
		let mut dead = None;
		inner.workers.retain(|entry| {
			if entry.id == worker {
				dead = Some(Arc::clone(&entry.handle));
				false
			} else {
				true
			}
		});
		if let Some(handle) = dead {
			warn!(target = "pq.pool", worker, "worker disconnected, removed from pool");
			close_detached(handle);
			satisfy_waiters(&self.shared.config, &mut inner);
		}
	}

	pub fn stats(&self) -> PoolStats {
		let inner = self.shared.inner.lock();
		PoolStats {
			total_workers: inner.workers.len(),
			active_sessions: inner.workers.iter().map(|w| w.active_sessions).sum(),
			pending_waiters: inner.waiters.len(),
			max_workers: self.shared.config.max_workers,
			max_sessions_per_worker: self.shared.config.max_sessions_per_worker,
		}
	}

	/// Shuts the pool down: pending waiters fail, workers are closed, and
	/// subsequent acquires are rejected.
	pub async fn close(&self) {
		let (workers, waiters) = {
			let mut inner = self.shared.inner.lock();
			inner.closed = true;
			(std::mem::take(&mut inner.workers), std::mem::take(&mut inner.waiters))
		};
		// Dropping the wait entries drops their senders; queued acquires
		// observe the closed channel and fail.
		drop(waiters);
		for entry in workers {
			entry.handle.close().await;
		}
		info!(target = "pq.pool", "pool closed");
	}
}

impl PoolShared {
	/// Returns a slot to its worker and hands freed capacity to the oldest
	/// waiter. Safe to call for a worker already evicted.
	pub(crate) fn release_slot(&self, worker: WorkerId) {
		let mut inner = self.inner.lock();
		if let Some(entry) = inner.workers.iter_mut().find(|w| w.id == worker) {
			entry.active_sessions = entry.active_sessions.saturating_sub(1);
			entry.last_used = Instant::now();
		}
		satisfy_waiters(&self.config, &mut inner);
	}
}

/// Claims capacity under the lock: an existing worker's spare slot first,
/// then permission to launch, else nothing. Dead workers found during the
/// scan are evicted on the spot so their slots are never handed out.
fn try_reserve(config: &PoolConfig, inner: &mut PoolInner) -> Option<Reservation> {
	let mut dead = Vec::new();
	inner.workers.retain(|entry| {
		if entry.handle.is_alive() {
			true
		} else {
			warn!(target = "pq.pool", worker = entry.id, "dead worker evicted during reservation");
			dead.push(Arc::clone(&entry.handle));
			false
		}
	});
	for handle in dead {
		close_detached(handle);
	}

	for entry in inner.workers.iter_mut() {
		if entry.active_sessions < config.max_sessions_per_worker {
			entry.active_sessions += 1;
			entry.last_used = Instant::now();
			return Some(Reservation::Slot {
				worker: entry.id,
				handle: Arc::clone(&entry.handle),
			});
		}
	}

	if inner.workers.len() + inner.launching < config.max_workers {
		inner.launching += 1;
		return Some(Reservation::Launch);
	}

	None
}

/// Hands freed capacity to waiters in FIFO order. Runs under the pool
/// lock, so a fresh `acquire` can never observe a slot reserved here.
fn satisfy_waiters(config: &PoolConfig, inner: &mut PoolInner) {
	loop {
		while inner.waiters.front().is_some_and(|w| w.tx.is_closed()) {
			inner.waiters.pop_front();
		}
		if inner.waiters.is_empty() {
			return;
		}
		let Some(reservation) = try_reserve(config, inner) else {
			return;
		};
		match inner.waiters.pop_front() {
			Some(waiter) => {
				if let Err(unclaimed) = waiter.tx.send(reservation) {
					return_reservation(inner, unclaimed);
				} else {
					debug!(target = "pq.pool", ticket = waiter.ticket, "freed slot handed to oldest waiter");
				}
			}
			None => {
				return_reservation(inner, reservation);
				return;
			}
		}
	}
}

/// Undoes a reservation that could not be redeemed.
fn return_reservation(inner: &mut PoolInner, reservation: Reservation) {
	match reservation {
		Reservation::Launch => inner.launching -= 1,
		Reservation::Slot { worker, .. } => {
			if let Some(entry) = inner.workers.iter_mut().find(|w| w.id == worker) {
				entry.active_sessions = entry.active_sessions.saturating_sub(1);
			}
		}
	}
}

fn close_detached(handle: Arc<dyn WorkerHandle>) {
	if let Ok(runtime) = tokio::runtime::Handle::try_current() {
		runtime.spawn(async move { handle.close().await });
	}
}

fn spawn_sweeper(shared: &Arc<PoolShared>) {
	let interval = shared.config.sweep_interval();
	if interval.is_zero() {
		return;
	}
	let Ok(runtime) = tokio::runtime::Handle::try_current() else {
		return;
	};
	let weak = Arc::downgrade(shared);
	runtime.spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		// The first tick completes immediately; consume it.
		ticker.tick().await;
		loop {
			ticker.tick().await;
			let Some(shared) = weak.upgrade() else { break };
			if sweep(&shared) {
				break;
			}
		}
	});
}

/// One eviction pass. Returns `true` once the pool is closed.
fn sweep(shared: &PoolShared) -> bool {
	let mut inner = shared.inner.lock();
	if inner.closed {
		return true;
	}
	let idle_timeout = shared.config.worker_idle_timeout();
	let mut closers = Vec::new();
	inner.workers.retain(|entry| {
		if !entry.handle.is_alive() {
			warn!(target = "pq.pool", worker = entry.id, "dead worker swept");
			closers.push(Arc::clone(&entry.handle));
			return false;
		}
		if entry.active_sessions == 0 && entry.last_used.elapsed() >= idle_timeout {
			debug!(
				target = "pq.pool",
				worker = entry.id,
				alive_for_ms = entry.created_at.elapsed().as_millis() as u64,
				"idle worker evicted"
			);
			closers.push(Arc::clone(&entry.handle));
			return false;
		}
		true
	});
	let evicted = !closers.is_empty();
	for handle in closers {
		close_detached(handle);
	}
	if evicted {
		satisfy_waiters(&shared.config, &mut inner);
	}
	false
}
