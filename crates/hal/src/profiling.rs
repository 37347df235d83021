// Copyright 2025 Irreducible Inc.

use std::path::PathBuf;

use bitflags::bitflags;

use crate::{error::ensure_argument, Error};

bitflags! {
	/// What a device records while profiling is active.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct ProfilingMode: u32 {
		/// Timing of queue submissions and their completion.
		const QUEUE_OPERATIONS = 1 << 0;
		/// Per-dispatch hardware counters.
		const DISPATCH_COUNTERS = 1 << 1;
		/// Per-executable aggregated counters.
		const EXECUTABLE_COUNTERS = 1 << 2;
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingOptions {
	pub mode: ProfilingMode,
	/// Where a backend writes its capture, if it produces one.
	pub file_path: Option<PathBuf>,
}

impl ProfilingOptions {
	pub fn new(mode: ProfilingMode) -> Self {
		Self {
			mode,
			file_path: None,
		}
	}

	pub fn validate(&self) -> Result<(), Error> {
		ensure_argument!(!self.mode.is_empty(), "profiling mode must select at least one source");
		if let Some(path) = &self.file_path {
			ensure_argument!(
				!path.as_os_str().is_empty(),
				"profiling capture path must not be empty"
			);
		}
		Ok(())
	}
}
