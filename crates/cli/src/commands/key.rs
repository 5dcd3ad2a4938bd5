//! Fingerprint inspection for request parameters.

use anyhow::anyhow;
use serde_json::json;

use pq_core::fingerprint;

use crate::output::{OutputFormat, ResultBuilder, print_result};

pub fn run(raw_params: &[String], format: OutputFormat) -> anyhow::Result<()> {
	let params = parse_params(raw_params)?;
	let key = fingerprint(params.iter().map(|(name, value)| (name.as_str(), value.as_str())));

	let result = ResultBuilder::new("key")
		.data(json!({
			"key": key,
			"params": params.len(),
		}))
		.build();
	print_result(&result, format);
	Ok(())
}

fn parse_params(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
	raw.iter()
		.map(|pair| {
			pair.split_once('=')
				.map(|(name, value)| (name.to_string(), value.to_string()))
				.ok_or_else(|| anyhow!("invalid parameter '{pair}', expected NAME=VALUE"))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_name_value_pairs() {
		let params = parse_params(&["origin=Berlin".to_string(), "dest=Hamburg".to_string()]).expect("pairs should parse");
		assert_eq!(params.len(), 2);
		assert_eq!(params[0], ("origin".to_string(), "Berlin".to_string()));
	}

	#[test]
	fn value_may_contain_equals_signs() {
		let params = parse_params(&["query=a=b".to_string()]).expect("pair should parse");
		assert_eq!(params[0], ("query".to_string(), "a=b".to_string()));
	}

	#[test]
	fn rejects_pairs_without_separator() {
		assert!(parse_params(&["origin".to_string()]).is_err());
	}
}
