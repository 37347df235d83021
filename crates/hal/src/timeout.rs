// Copyright 2025 Irreducible Inc.

use std::time::{Duration, Instant};

/// How long a blocking operation may wait before reporting [`crate::Error::DeadlineExceeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
	/// Poll once and return without blocking.
	Immediate,
	/// Block until the given instant.
	Deadline(Instant),
	/// Block until the condition holds.
	#[default]
	Infinite,
}

impl Timeout {
	/// A deadline relative to now. Durations too large to represent become [`Timeout::Infinite`].
	pub fn after(duration: Duration) -> Self {
		if duration.is_zero() {
			return Self::Immediate;
		}
		Instant::now()
			.checked_add(duration)
			.map_or(Self::Infinite, Self::Deadline)
	}

	/// The absolute deadline, or `None` when the wait is unbounded.
	pub fn deadline(&self) -> Option<Instant> {
		match self {
			Self::Immediate => Some(Instant::now()),
			Self::Deadline(deadline) => Some(*deadline),
			Self::Infinite => None,
		}
	}

	/// Time left before the deadline, saturating at zero. `None` when unbounded.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline()
			.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}

	pub fn is_immediate(&self) -> bool {
		matches!(self, Self::Immediate)
	}

	pub fn is_infinite(&self) -> bool {
		matches!(self, Self::Infinite)
	}
}

impl From<Duration> for Timeout {
	fn from(duration: Duration) -> Self {
		Self::after(duration)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_relative_timeouts() {
		assert_eq!(Timeout::after(Duration::ZERO), Timeout::Immediate);
		assert!(Timeout::after(Duration::MAX).is_infinite());

		let timeout = Timeout::after(Duration::from_secs(60));
		let remaining = timeout.remaining().unwrap();
		assert!(remaining > Duration::from_secs(59));
		assert!(remaining <= Duration::from_secs(60));
	}

	#[test]
	fn test_expired_deadline_has_no_time_left() {
		let timeout = Timeout::Deadline(Instant::now());
		assert_eq!(timeout.remaining(), Some(Duration::ZERO));
		assert_eq!(Timeout::Immediate.remaining(), Some(Duration::ZERO));
		assert_eq!(Timeout::Infinite.remaining(), None);
	}
}
