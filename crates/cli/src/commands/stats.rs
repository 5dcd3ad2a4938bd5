//! Engine statistics for a fresh process.
//!
//! Pool, breaker, and cache state live in process memory and reset on
//! restart, so this reports the counters of a newly composed engine —
//! useful for verifying effective configuration, not for monitoring a
//! running service.

use std::sync::Arc;

use pq_core::EngineConfig;
use pq_pool::ChromiumBackend;

use crate::engine::QuoteEngine;
use crate::output::{OutputFormat, ResultBuilder, print_result};

pub async fn run(config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
	let engine = QuoteEngine::new(config, Arc::new(ChromiumBackend::new()));
	let stats = engine.stats();
	engine.close().await;

	let result = ResultBuilder::new("stats").data(stats).build();
	print_result(&result, format);
	Ok(())
}
