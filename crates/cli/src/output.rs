//! Structured command result envelope and printing.

use std::time::Instant;

use clap::ValueEnum;
use serde::Serialize;

use pq_core::Error;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text
	#[default]
	Text,
	/// JSON output
	Json,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// Machine-readable command failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub retry_after_ms: Option<u64>,
}

impl From<&Error> for CommandError {
	fn from(err: &Error) -> Self {
		Self {
			code: err.kind().to_string(),
			message: err.to_string(),
			retry_after_ms: err.retry_after_ms(),
		}
	}
}

/// Envelope printed for every command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	pub duration_ms: u64,
}

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		CommandResult {
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: self.start_time.elapsed().as_millis() as u64,
		}
	}
}

/// Print a command result to stdout in the specified format.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			if result.ok {
				if let Some(ref data) = result.data {
					if let Ok(json) = serde_json::to_string_pretty(data) {
						println!("{json}");
					}
				}
			} else if let Some(ref error) = result.error {
				println!("Error [{}]: {}", error.code, error.message);
				if let Some(retry_after_ms) = error.retry_after_ms {
					println!("Retry after: {retry_after_ms}ms");
				}
			}
			println!("Completed in {}ms", result.duration_ms);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ok_requires_data_and_no_error() {
		let result = ResultBuilder::new("doctor").data(serde_json::json!({ "healthy": true })).build();
		assert!(result.ok);

		let result: CommandResult<serde_json::Value> = ResultBuilder::new("doctor").build();
		assert!(!result.ok);
	}

	#[test]
	fn error_envelope_carries_kind_and_retry_hint() {
		let err = Error::CircuitOpen { retry_after_ms: 450 };
		let result: CommandResult<serde_json::Value> = ResultBuilder::new("quote").error(CommandError::from(&err)).build();

		assert!(!result.ok);
		let json = serde_json::to_value(&result).expect("envelope should serialize");
		assert_eq!(json["error"]["code"], "circuit_open");
		assert_eq!(json["error"]["retryAfterMs"], 450);
	}

	#[test]
	fn non_cooldown_errors_omit_the_retry_hint() {
		let err = Error::TaskFatal("bad input".to_string());
		let envelope = CommandError::from(&err);
		let json = serde_json::to_value(&envelope).expect("error should serialize");
		assert!(json.get("retryAfterMs").is_none());
	}
}
