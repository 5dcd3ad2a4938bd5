//! Bounded pool of heavyweight automation workers and their leased sessions.
//!
//! A worker is an expensive long-lived browser process hosting several
//! concurrent sessions; a session is a single-use execution context handed
//! to exactly one automation task and torn down on release. The pool owns
//! admission control: workers are created lazily up to a maximum, sessions
//! are leased up to a per-worker limit, and callers beyond capacity wait on
//! a FIFO queue with a deadline. Crashed workers are evicted immediately;
//! idle ones are swept in the background.
//!
//! The backend that actually spawns processes sits behind the
//! [`backend::WorkerBackend`] seam, with a Chromium implementation for
//! production and an in-memory fake for tests.

/// Worker process backends: trait seam, Chromium, and the test fake.
pub mod backend;
/// Pool admission, wait queue, and eviction.
pub mod pool;
/// Session policy, leased session guard.
pub mod session;
/// Caller-supplied unit of automation work.
pub mod task;

pub use backend::{ChromiumBackend, FakeBackend, FakeController, SessionHandle, WorkerBackend, WorkerHandle};
pub use pool::{PoolStats, WorkerId, WorkerPool};
pub use session::{LeasedSession, Session, SessionPolicy};
pub use task::AutomationTask;
