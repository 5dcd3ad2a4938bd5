//! Worker process backends.
//!
//! The pool never talks to a browser directly; it goes through this seam so
//! production runs against real Chromium processes while tests script
//! failures against an in-memory fake.

use async_trait::async_trait;

use pq_core::Result;

use crate::session::SessionPolicy;

/// Chromium process backend.
pub mod chromium;
/// Scriptable in-memory backend for tests.
pub mod fake;

pub use chromium::ChromiumBackend;
pub use fake::{FakeBackend, FakeController};

/// Launches heavyweight worker processes.
#[async_trait]
pub trait WorkerBackend: Send + Sync + 'static {
	/// Starts a new worker. Implementations return
	/// [`pq_core::Error::WorkerCreationFailed`] when the process cannot
	/// come up.
	async fn launch(&self) -> Result<Box<dyn WorkerHandle>>;
}

/// A live worker process capable of hosting sessions.
#[async_trait]
pub trait WorkerHandle: Send + Sync + 'static {
	/// Opens and hardens a fresh single-use session. Implementations
	/// return [`pq_core::Error::SessionSetupFailed`] when setup fails.
	async fn open_session(&self, policy: &SessionPolicy) -> Result<Box<dyn SessionHandle>>;

	/// Whether the underlying process is still connected. A `false` here
	/// gets the worker evicted from the pool.
	fn is_alive(&self) -> bool;

	/// Shuts the worker down. Best-effort; never fails.
	async fn close(&self);
}

/// A single-use execution context leased from a worker.
#[async_trait]
pub trait SessionHandle: Send + Sync + 'static {
	/// Endpoint the task driver connects to (e.g. a DevTools websocket URL).
	fn endpoint(&self) -> &str;

	/// Tears the session down. Callers treat failures as best-effort.
	async fn close(&self) -> Result<()>;
}
