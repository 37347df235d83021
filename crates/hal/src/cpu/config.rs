// Copyright 2025 Irreducible Inc.

use std::time::Duration;

use gantry_utils::env::{boolean_env_flag_set, duration_env_var_micros, parsed_env_var};

use crate::{error::ensure_argument, Error};

pub const DEVICE_ID_ENV: &str = "GANTRY_CPU_DEVICE_ID";
pub const QUEUE_COUNT_ENV: &str = "GANTRY_CPU_QUEUE_COUNT";
pub const POLL_INTERVAL_ENV: &str = "GANTRY_CPU_POLL_INTERVAL_US";
pub const NO_TILE_NARROWING_ENV: &str = "GANTRY_CPU_NO_TILE_NARROWING";

/// Settings of a [`super::CpuDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuDeviceConfig {
	/// Device identifier, matched by `hal.device.id` queries.
	pub identifier: String,
	/// Number of queues exposed through queue affinities. All queues share one executor.
	pub queue_count: usize,
	/// How often the executor rechecks pending work that waits on semaphores it is not notified
	/// about.
	pub poll_interval: Duration,
	pub narrow_tile_adjustment: bool,
}

impl Default for CpuDeviceConfig {
	fn default() -> Self {
		Self {
			identifier: "local-task".to_string(),
			queue_count: 1,
			poll_interval: Duration::from_millis(1),
			narrow_tile_adjustment: true,
		}
	}
}

impl CpuDeviceConfig {
	/// Default settings overridden by `GANTRY_CPU_*` environment variables.
	pub fn from_env() -> Self {
		let defaults = Self::default();
		Self {
			identifier: parsed_env_var(DEVICE_ID_ENV).unwrap_or(defaults.identifier),
			queue_count: parsed_env_var(QUEUE_COUNT_ENV).unwrap_or(defaults.queue_count),
			poll_interval: duration_env_var_micros(POLL_INTERVAL_ENV)
				.unwrap_or(defaults.poll_interval),
			narrow_tile_adjustment: !boolean_env_flag_set(NO_TILE_NARROWING_ENV),
		}
	}

	pub fn validate(&self) -> Result<(), Error> {
		ensure_argument!(!self.identifier.is_empty(), "device identifier must not be empty");
		ensure_argument!(
			(1..=u64::BITS as usize).contains(&self.queue_count),
			"queue count must be between 1 and {}, got {}",
			u64::BITS,
			self.queue_count
		);
		ensure_argument!(!self.poll_interval.is_zero(), "poll interval must be non-zero");
		Ok(())
	}
}
