//! Backend health check: launch a worker, lease a session, report.

use std::sync::Arc;

use anyhow::anyhow;
use serde_json::json;

use pq_core::EngineConfig;
use pq_pool::{ChromiumBackend, WorkerPool};

use crate::output::{OutputFormat, ResultBuilder, print_result};

pub async fn run(headful: bool, workers: usize, config: EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
	let backend = ChromiumBackend::new().with_headless(!headful);
	let mut pool_config = config.pool;
	pool_config.max_workers = workers.max(1);
	let pool = WorkerPool::new(pool_config, Arc::new(backend));

	let lease = match pool.acquire().await {
		Ok(lease) => lease,
		Err(err) => {
			pool.close().await;
			return Err(anyhow!("backend health check failed: {err}"));
		}
	};

	let session = lease.session();
	let data = json!({
		"healthy": true,
		"worker": session.worker(),
		"endpoint": session.endpoint(),
		"locale": session.policy().locale,
		"stats": pool.stats(),
	});
	lease.release().await;
	pool.close().await;

	let result = ResultBuilder::new("doctor").data(data).build();
	print_result(&result, format);
	Ok(())
}
