//! Command dispatch.

use pq_core::EngineConfig;

use crate::cli::{Cli, Commands};

/// Backend health check.
pub mod doctor;
/// Fingerprint inspection.
pub mod key;
/// Engine statistics.
pub mod stats;

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
	let config = cli.config.as_deref().map(EngineConfig::load).unwrap_or_default();

	match cli.command {
		Commands::Doctor { headful, workers } => doctor::run(headful, workers, config, cli.format).await,
		Commands::Key { params } => key::run(&params, cli.format),
		Commands::Stats => stats::run(config, cli.format).await,
	}
}
