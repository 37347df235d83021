// Copyright 2025 Irreducible Inc.

use std::fmt::Debug;

use auto_impl::auto_impl;

use crate::Error;

/// Supplies collective-communication defaults to a device, for example the rank of this process
/// within a multi-process job.
#[auto_impl(&, Arc, Box)]
pub trait ChannelProvider: Debug + Send + Sync {
	/// Returns `(rank, count)` for the default channel.
	fn query_default_rank_and_count(&self) -> Result<(usize, usize), Error>;
}

/// A provider with a fixed rank and participant count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticChannelProvider {
	pub rank: usize,
	pub count: usize,
}

impl ChannelProvider for StaticChannelProvider {
	fn query_default_rank_and_count(&self) -> Result<(usize, usize), Error> {
		if self.rank >= self.count {
			return Err(Error::OutOfRange(format!(
				"channel rank {} is not below participant count {}",
				self.rank, self.count
			)));
		}
		Ok((self.rank, self.count))
	}
}
