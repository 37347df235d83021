// Copyright 2025 Irreducible Inc.

use std::sync::{atomic::Ordering, Arc};

use super::memory::{HeapStats, HeapStorage};
use crate::{
	allocator::{Allocator, AllocatorStatistics},
	buffer::{Allocation, Buffer, BufferParams},
	DeviceSize, Error,
};

/// Allocates zeroed buffers on the host heap.
#[derive(Debug)]
pub struct HeapAllocator {
	identifier: String,
	stats: Arc<HeapStats>,
}

impl HeapAllocator {
	pub fn new(identifier: impl Into<String>) -> Self {
		Self {
			identifier: identifier.into(),
			stats: Arc::default(),
		}
	}
}

impl Allocator for HeapAllocator {
	fn identifier(&self) -> &str {
		&self.identifier
	}

	fn allocate_buffer(
		&self,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error> {
		let len = usize::try_from(allocation_size).map_err(|_| {
			Error::ResourceExhausted(format!(
				"allocation of {allocation_size} bytes exceeds the host address space"
			))
		})?;
		let storage = HeapStorage::zeroed(len, Arc::clone(&self.stats));
		tracing::trace!(allocator = %self.identifier, size = allocation_size, "heap allocation");
		Ok(Buffer::new(Allocation::new(
			allocation_size,
			params.memory_type,
			params.usage,
			storage,
		)))
	}

	fn statistics(&self) -> AllocatorStatistics {
		AllocatorStatistics {
			bytes_allocated: self.stats.allocated.load(Ordering::Relaxed),
			bytes_freed: self.stats.freed.load(Ordering::Relaxed),
			peak_bytes_live: self.stats.peak_live.load(Ordering::Relaxed),
		}
	}
}
