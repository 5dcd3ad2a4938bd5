//! Command-line definition for the `pq` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "pq", about = "Resilient browser-automation pool for price quotes", version)]
pub struct Cli {
	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	/// Increase log verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Path to a JSON config file
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Launch a worker, lease a session, and report backend health
	Doctor {
		/// Run the browser with a visible window
		#[arg(long)]
		headful: bool,
		/// Worker budget for the health check
		#[arg(long, default_value_t = 1)]
		workers: usize,
	},
	/// Print the normalized fingerprint for request parameters
	Key {
		/// Request parameter as NAME=VALUE; repeatable
		#[arg(long = "param", value_name = "NAME=VALUE")]
		params: Vec<String>,
	},
	/// Print pool, breaker, and cache statistics for a fresh engine
	Stats,
}
