//! Leased sessions and the hardening policy applied to them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use pq_core::{PoolConfig, Result};

use crate::backend::SessionHandle;
use crate::pool::{PoolShared, WorkerId};

/// Hardening applied to every session before its task runs.
///
/// The policy travels with the session; task drivers apply the network
/// filter, locale, and viewport over their own devtools connection before
/// the first navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPolicy {
	/// Host patterns whose requests the driver aborts.
	pub blocked_hosts: Vec<String>,
	pub locale: String,
	pub viewport_width: u32,
	pub viewport_height: u32,
	pub navigation_timeout_ms: u64,
	pub default_timeout_ms: u64,
}

impl Default for SessionPolicy {
	fn default() -> Self {
		Self {
			blocked_hosts: vec![
				"doubleclick.net".to_string(),
				"google-analytics.com".to_string(),
				"googletagmanager.com".to_string(),
				"connect.facebook.net".to_string(),
				"hotjar.com".to_string(),
			],
			locale: "en-US".to_string(),
			viewport_width: 1366,
			viewport_height: 768,
			navigation_timeout_ms: 30_000,
			default_timeout_ms: 15_000,
		}
	}
}

impl SessionPolicy {
	/// Builds the default hardening policy with timeouts from pool config.
	pub fn from_config(config: &PoolConfig) -> Self {
		Self {
			navigation_timeout_ms: config.navigation_timeout_ms,
			default_timeout_ms: config.default_timeout_ms,
			..Self::default()
		}
	}
}

/// A hardened single-use execution context belonging to one live worker.
pub struct Session {
	worker: WorkerId,
	handle: Box<dyn SessionHandle>,
	policy: SessionPolicy,
}

impl Session {
	pub(crate) fn new(worker: WorkerId, handle: Box<dyn SessionHandle>, policy: SessionPolicy) -> Self {
		Self { worker, handle, policy }
	}

	/// Identity of the owning worker.
	pub fn worker(&self) -> WorkerId {
		self.worker
	}

	/// Endpoint the task driver connects to.
	pub fn endpoint(&self) -> &str {
		self.handle.endpoint()
	}

	/// Hardening state applied to this session.
	pub fn policy(&self) -> &SessionPolicy {
		&self.policy
	}

	pub(crate) async fn close(self) -> Result<()> {
		self.handle.close().await
	}
}

/// A claim on pool capacity, terminated exactly once.
///
/// Call [`LeasedSession::release`] when the task settles. Dropping the
/// guard without releasing returns the slot too, so an abandoned attempt
/// cannot hold capacity forever, but explicit release is the normal path:
/// it tears the session down in order before freeing the slot.
pub struct LeasedSession {
	pool: Arc<PoolShared>,
	worker: WorkerId,
	session: Option<Session>,
}

impl LeasedSession {
	pub(crate) fn new(pool: Arc<PoolShared>, worker: WorkerId, session: Session) -> Self {
		Self {
			pool,
			worker,
			session: Some(session),
		}
	}

	/// The leased session. Valid until release; release consumes the lease.
	pub fn session(&self) -> &Session {
		self.session.as_ref().expect("lease accessed after release")
	}

	/// Tears down the session (best-effort) and returns the slot to the
	/// pool, waking the oldest waiter if one is queued.
	pub async fn release(mut self) {
		if let Some(session) = self.session.take() {
			if let Err(err) = session.close().await {
				debug!(target = "pq.pool", worker = self.worker, error = %err, "session teardown failed");
			}
			self.pool.release_slot(self.worker);
		}
	}
}

impl std::fmt::Debug for LeasedSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LeasedSession")
			.field("worker", &self.worker)
			.field("leased", &self.session.is_some())
			.finish()
	}
}

impl Drop for LeasedSession {
	fn drop(&mut self) {
		if let Some(session) = self.session.take() {
			debug!(target = "pq.pool", worker = self.worker, "lease dropped without release, returning slot");
			if let Ok(runtime) = tokio::runtime::Handle::try_current() {
				runtime.spawn(async move {
					let _ = session.close().await;
				});
			}
			self.pool.release_slot(self.worker);
		}
	}
}
