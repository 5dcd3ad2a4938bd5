//! Resilience layer for automation calls.
//!
//! Four wrappers compose around a fallible automation task: the result
//! [`Cache`] memoizes prior outputs, the [`Deduplicator`] coalesces
//! concurrent identical calls, the [`CircuitBreaker`] sheds load from a
//! failing backend, and the retry/timeout functions bound each attempt in
//! time and retry transient failures with backoff.
//!
//! Callers compose them outside-in as
//! `cache → dedupe → breaker → retry → timeout → task`, so the breaker
//! observes one aggregate signal per logical call and a cache hit
//! short-circuits everything.

/// Circuit breaker state machine.
pub mod breaker;
/// Time-boxed, capacity-bounded result memo.
pub mod cache;
/// In-flight request coalescing.
pub mod dedupe;
/// Per-attempt timeout and transient-failure retry.
pub mod retry;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use cache::{Cache, CacheStats};
pub use dedupe::Deduplicator;
pub use retry::{with_retry, with_timeout};
