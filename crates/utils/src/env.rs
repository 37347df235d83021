// Copyright 2024 Irreducible Inc.

use std::{str::FromStr, time::Duration};

/// Read boolean flag from the environment variable.
pub fn boolean_env_flag_set(flag: &str) -> bool {
	match std::env::var(flag) {
		Ok(val) => ["1", "on", "ON", "true", "TRUE", "yes", "YES"].contains(&val.as_str()),
		Err(_) => false,
	}
}

/// Read and parse a value from the environment variable.
///
/// Returns `None` when the variable is unset or empty, or when it fails to parse as `T`, in which
/// case a warning is logged.
pub fn parsed_env_var<T: FromStr>(name: &str) -> Option<T> {
	let raw = std::env::var(name).ok()?;
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return None;
	}
	match trimmed.parse() {
		Ok(value) => Some(value),
		Err(_) => {
			::tracing::warn!(
				variable = name,
				value = trimmed,
				"ignoring unparsable environment value"
			);
			None
		}
	}
}

/// Read a duration expressed in microseconds from the environment variable.
pub fn duration_env_var_micros(name: &str) -> Option<Duration> {
	parsed_env_var::<u64>(name).map(Duration::from_micros)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unset_variables() {
		assert!(!boolean_env_flag_set("GANTRY_UTILS_TEST_UNSET_FLAG"));
		assert_eq!(parsed_env_var::<usize>("GANTRY_UTILS_TEST_UNSET_VALUE"), None);
		assert_eq!(duration_env_var_micros("GANTRY_UTILS_TEST_UNSET_VALUE"), None);
	}

	#[test]
	fn test_parsed_values() {
		std::env::set_var("GANTRY_UTILS_TEST_PARSED", " 12 ");
		assert_eq!(parsed_env_var::<usize>("GANTRY_UTILS_TEST_PARSED"), Some(12));
		assert_eq!(
			duration_env_var_micros("GANTRY_UTILS_TEST_PARSED"),
			Some(Duration::from_micros(12))
		);

		std::env::set_var("GANTRY_UTILS_TEST_GARBAGE", "twelve");
		assert_eq!(parsed_env_var::<usize>("GANTRY_UTILS_TEST_GARBAGE"), None);
	}

	#[test]
	fn test_boolean_flag() {
		std::env::set_var("GANTRY_UTILS_TEST_FLAG_ON", "yes");
		std::env::set_var("GANTRY_UTILS_TEST_FLAG_OFF", "0");
		assert!(boolean_env_flag_set("GANTRY_UTILS_TEST_FLAG_ON"));
		assert!(!boolean_env_flag_set("GANTRY_UTILS_TEST_FLAG_OFF"));
	}
}
