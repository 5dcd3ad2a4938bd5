//! Request fingerprinting for cache and dedupe keys.

/// Builds a normalized fingerprint from request parameters.
///
/// Pairs are sorted by field name and values are trimmed, lowercased, and
/// whitespace-collapsed, so semantically identical requests differing only
/// in case, spacing, or field order produce identical keys.
pub fn fingerprint<I, K, V>(params: I) -> String
where
	I: IntoIterator<Item = (K, V)>,
	K: AsRef<str>,
	V: AsRef<str>,
{
	let mut pairs: Vec<(String, String)> = params
		.into_iter()
		.map(|(k, v)| (normalize(k.as_ref()), normalize(v.as_ref())))
		.collect();
	pairs.sort();

	let mut key = String::new();
	for (i, (name, value)) in pairs.iter().enumerate() {
		if i > 0 {
			key.push('\u{1f}');
		}
		key.push_str(name);
		key.push('=');
		key.push_str(value);
	}
	key
}

fn normalize(raw: &str) -> String {
	raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn field_order_does_not_matter() {
		let a = fingerprint([("origin", "Berlin"), ("dest", "Hamburg")]);
		let b = fingerprint([("dest", "Hamburg"), ("origin", "Berlin")]);
		assert_eq!(a, b);
	}

	#[test]
	fn case_and_whitespace_are_normalized() {
		let a = fingerprint([("origin", "  BERLIN  Mitte "), ("qty", "2")]);
		let b = fingerprint([("origin", "berlin mitte"), ("qty", "2")]);
		assert_eq!(a, b);
	}

	#[test]
	fn different_values_produce_different_keys() {
		let a = fingerprint([("origin", "berlin"), ("dest", "hamburg")]);
		let b = fingerprint([("origin", "berlin"), ("dest", "munich")]);
		assert_ne!(a, b);
	}

	#[test]
	fn values_cannot_bleed_across_fields() {
		let a = fingerprint([("a", "x y"), ("b", "z")]);
		let b = fingerprint([("a", "x"), ("b", "y z")]);
		assert_ne!(a, b);
	}

	#[test]
	fn empty_params_produce_empty_key() {
		assert_eq!(fingerprint(std::iter::empty::<(&str, &str)>()), "");
	}
}
