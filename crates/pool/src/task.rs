//! The caller-supplied unit of automation work.

use async_trait::async_trait;

use pq_core::Result;

use crate::session::Session;

/// A fallible automation step sequence executed against one leased session.
///
/// The pool and resilience layers treat the task as opaque: it navigates,
/// interacts, and extracts however it likes, and reports failures through
/// the shared error taxonomy — [`pq_core::Error::TaskTransient`] for
/// outcomes worth retrying, [`pq_core::Error::TaskFatal`] for ones that are
/// not.
#[async_trait]
pub trait AutomationTask: Send + Sync {
	async fn run(&self, session: &Session) -> Result<serde_json::Value>;
}
