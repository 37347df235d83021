// Copyright 2025 Irreducible Inc.

use std::{fmt::Debug, sync::Arc};

use auto_impl::auto_impl;
use bytemuck::zeroed_vec;

use crate::{
	buffer::{Buffer, BufferParams},
	DeviceSize, Error,
};

/// Allocates device buffers.
///
/// Every device owns one; [`crate::Device::replace_allocator`] swaps it for a caller-provided one,
/// e.g. a caching or tracking wrapper around the original.
#[auto_impl(&, Arc, Box)]
pub trait Allocator: Debug + Send + Sync {
	fn identifier(&self) -> &str;

	/// Allocates a buffer of `allocation_size` bytes. Contents are zeroed unless the backend
	/// documents otherwise.
	fn allocate_buffer(
		&self,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error>;

	/// Releases cached or pooled memory that is not in use.
	fn trim(&self) -> Result<(), Error> {
		Ok(())
	}

	fn statistics(&self) -> AllocatorStatistics {
		AllocatorStatistics::default()
	}
}

/// Running totals reported by an [`Allocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStatistics {
	pub bytes_allocated: u64,
	pub bytes_freed: u64,
	pub peak_bytes_live: u64,
}

impl AllocatorStatistics {
	pub fn bytes_live(&self) -> u64 {
		self.bytes_allocated - self.bytes_freed
	}
}

/// Token selecting the pool that services queue-ordered allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocatorPool(pub u64);

impl AllocatorPool {
	pub const DEFAULT: Self = Self(0);
}

/// Allocates host memory prepared for transfers to and from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAllocator {
	alignment: usize,
}

impl HostAllocator {
	pub const fn new(alignment: usize) -> Self {
		Self { alignment }
	}

	/// Preferred alignment of host staging memory, in bytes.
	pub fn alignment(&self) -> usize {
		self.alignment
	}

	/// Allocates `len` zeroed bytes.
	pub fn alloc_zeroed(&self, len: usize) -> Vec<u8> {
		zeroed_vec(len)
	}
}

impl Default for HostAllocator {
	fn default() -> Self {
		Self::new(std::mem::align_of::<u128>())
	}
}
