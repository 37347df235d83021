// Copyright 2025 Irreducible Inc.

use std::{any::Any, fmt, ops::Range, sync::Arc};

use bitflags::bitflags;

use crate::{
	error::ensure_argument,
	queue::QueueAffinity,
	resource::{Resource, ResourceId},
	DeviceSize, Error,
};

bitflags! {
	/// Where an allocation lives and how the host may reach it.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct MemoryType: u32 {
		const OPTIMAL = 1 << 0;
		const HOST_VISIBLE = 1 << 1;
		const HOST_COHERENT = 1 << 2;
		const HOST_CACHED = 1 << 3;
		const DEVICE_VISIBLE = 1 << 4;
		const DEVICE_LOCAL = 1 << 5;

		const HOST_LOCAL = Self::HOST_VISIBLE.bits() | Self::HOST_COHERENT.bits();
	}
}

bitflags! {
	/// Operations a buffer may participate in.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct BufferUsage: u32 {
		const TRANSFER_SOURCE = 1 << 0;
		const TRANSFER_TARGET = 1 << 1;
		const DISPATCH_STORAGE = 1 << 2;
		const MAPPING = 1 << 3;

		const TRANSFER = Self::TRANSFER_SOURCE.bits() | Self::TRANSFER_TARGET.bits();
		const DEFAULT = Self::TRANSFER.bits() | Self::DISPATCH_STORAGE.bits();
	}
}

/// Parameters requested when allocating a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferParams {
	pub usage: BufferUsage,
	pub memory_type: MemoryType,
	pub queue_affinity: QueueAffinity,
}

impl Default for BufferParams {
	fn default() -> Self {
		Self {
			usage: BufferUsage::DEFAULT,
			memory_type: MemoryType::DEVICE_LOCAL,
			queue_affinity: QueueAffinity::ANY,
		}
	}
}

/// The backing storage of one or more [`Buffer`] views.
///
/// The storage object is owned by the backend that produced the allocation and is opaque to this
/// layer; backends recover it with [`Allocation::storage`].
pub struct Allocation {
	id: ResourceId,
	size: DeviceSize,
	memory_type: MemoryType,
	usage: BufferUsage,
	storage: Box<dyn Any + Send + Sync>,
}

impl Allocation {
	pub fn new(
		size: DeviceSize,
		memory_type: MemoryType,
		usage: BufferUsage,
		storage: impl Any + Send + Sync,
	) -> Arc<Self> {
		Arc::new(Self {
			id: ResourceId::next(),
			size,
			memory_type,
			usage,
			storage: Box::new(storage),
		})
	}

	pub fn id(&self) -> ResourceId {
		self.id
	}

	pub fn size(&self) -> DeviceSize {
		self.size
	}

	pub fn memory_type(&self) -> MemoryType {
		self.memory_type
	}

	pub fn usage(&self) -> BufferUsage {
		self.usage
	}

	/// Returns the backend storage if it has type `T`.
	pub fn storage<T: Any>(&self) -> Option<&T> {
		self.storage.downcast_ref()
	}
}

impl fmt::Debug for Allocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Allocation")
			.field("id", &self.id)
			.field("size", &self.size)
			.field("memory_type", &self.memory_type)
			.field("usage", &self.usage)
			.finish_non_exhaustive()
	}
}

/// Result of comparing two buffer ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOverlap {
	/// The ranges share no bytes.
	Disjoint,
	/// The ranges share at least one byte.
	Overlapping,
	/// The ranges could not be resolved, for example because one of them is out of bounds.
	Unknown,
}

/// A device-resident byte range over an [`Allocation`].
#[derive(Debug)]
pub struct Buffer {
	id: ResourceId,
	allocation: Arc<Allocation>,
	byte_offset: DeviceSize,
	byte_length: DeviceSize,
}

impl Buffer {
	/// Creates a buffer covering the whole allocation.
	pub fn new(allocation: Arc<Allocation>) -> Arc<Self> {
		let byte_length = allocation.size();
		Arc::new(Self {
			id: ResourceId::next(),
			allocation,
			byte_offset: 0,
			byte_length,
		})
	}

	/// Creates a view of `length` bytes starting `offset` bytes into this buffer.
	///
	/// The view shares the backing allocation, which stays alive as long as any view does.
	pub fn subspan(&self, offset: DeviceSize, length: DeviceSize) -> Result<Arc<Self>, Error> {
		let range = self.calculate_range(offset, length)?;
		Ok(Arc::new(Self {
			id: ResourceId::next(),
			allocation: Arc::clone(&self.allocation),
			byte_offset: range.start,
			byte_length: length,
		}))
	}

	pub fn id(&self) -> ResourceId {
		self.id
	}

	pub fn allocation(&self) -> &Arc<Allocation> {
		&self.allocation
	}

	pub fn byte_offset(&self) -> DeviceSize {
		self.byte_offset
	}

	pub fn byte_length(&self) -> DeviceSize {
		self.byte_length
	}

	pub fn memory_type(&self) -> MemoryType {
		self.allocation.memory_type()
	}

	pub fn usage(&self) -> BufferUsage {
		self.allocation.usage()
	}

	/// Resolves `[offset, offset + length)` relative to this buffer into a range of the backing
	/// allocation.
	pub fn calculate_range(
		&self,
		offset: DeviceSize,
		length: DeviceSize,
	) -> Result<Range<DeviceSize>, Error> {
		let end = offset.checked_add(length).filter(|&end| end <= self.byte_length);
		let Some(end) = end else {
			return Err(Error::OutOfRange(format!(
				"range [{offset}, {offset}+{length}) exceeds buffer {} of length {}",
				self.id, self.byte_length
			)));
		};
		Ok(self.byte_offset + offset..self.byte_offset + end)
	}

	/// Compares `[lhs_offset, lhs_offset + lhs_length)` of `lhs` with the corresponding range of
	/// `rhs`.
	///
	/// Views over different allocations never overlap. Ranges that do not fit in their buffer are
	/// reported as [`BufferOverlap::Unknown`].
	pub fn test_overlap(
		lhs: &Self,
		lhs_offset: DeviceSize,
		lhs_length: DeviceSize,
		rhs: &Self,
		rhs_offset: DeviceSize,
		rhs_length: DeviceSize,
	) -> BufferOverlap {
		if !Arc::ptr_eq(&lhs.allocation, &rhs.allocation) {
			return BufferOverlap::Disjoint;
		}
		let (Ok(lhs), Ok(rhs)) = (
			lhs.calculate_range(lhs_offset, lhs_length),
			rhs.calculate_range(rhs_offset, rhs_length),
		) else {
			return BufferOverlap::Unknown;
		};
		if lhs.is_empty() || rhs.is_empty() || lhs.end <= rhs.start || rhs.end <= lhs.start {
			BufferOverlap::Disjoint
		} else {
			BufferOverlap::Overlapping
		}
	}

	/// Checks that this buffer allows every usage in `required`.
	pub fn validate_usage(&self, required: BufferUsage) -> Result<(), Error> {
		ensure_argument!(
			self.usage().contains(required),
			"buffer {} usage {:?} does not allow {:?}",
			self.id,
			self.usage(),
			required
		);
		Ok(())
	}
}

impl Resource for Buffer {
	fn resource_id(&self) -> ResourceId {
		self.id
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	fn make_buffer(size: DeviceSize) -> Arc<Buffer> {
		Buffer::new(Allocation::new(size, MemoryType::DEVICE_LOCAL, BufferUsage::DEFAULT, ()))
	}

	#[test]
	fn test_subspan_shares_allocation() {
		let buffer = make_buffer(256);
		let view = buffer.subspan(64, 128).unwrap();
		assert_eq!(view.byte_offset(), 64);
		assert_eq!(view.byte_length(), 128);
		assert!(Arc::ptr_eq(view.allocation(), buffer.allocation()));
		assert_eq!(view.calculate_range(8, 8).unwrap(), 72..80);

		let nested = view.subspan(32, 32).unwrap();
		assert_eq!(nested.byte_offset(), 96);
		assert!(view.subspan(100, 29).is_err());
	}

	#[test]
	fn test_overlap_between_views() {
		let buffer = make_buffer(256);
		let lo = buffer.subspan(0, 128).unwrap();
		let hi = buffer.subspan(128, 128).unwrap();

		assert_eq!(Buffer::test_overlap(&lo, 0, 128, &hi, 0, 128), BufferOverlap::Disjoint);
		assert_eq!(Buffer::test_overlap(&lo, 64, 64, &buffer, 96, 64), BufferOverlap::Overlapping);
		assert_eq!(Buffer::test_overlap(&lo, 0, 129, &hi, 0, 1), BufferOverlap::Unknown);

		let other = make_buffer(256);
		assert_eq!(Buffer::test_overlap(&buffer, 0, 256, &other, 0, 256), BufferOverlap::Disjoint);
	}

	#[test]
	fn test_offset_overflow_is_out_of_range() {
		let buffer = make_buffer(16);
		assert!(matches!(buffer.calculate_range(u64::MAX, 2), Err(Error::OutOfRange(_))));
	}

	#[test]
	fn test_validate_usage() {
		let buffer = Buffer::new(Allocation::new(
			16,
			MemoryType::DEVICE_LOCAL,
			BufferUsage::TRANSFER_SOURCE,
			(),
		));
		assert!(buffer.validate_usage(BufferUsage::TRANSFER_SOURCE).is_ok());
		assert!(buffer.validate_usage(BufferUsage::TRANSFER_TARGET).is_err());
	}

	proptest! {
		#[test]
		fn overlap_matches_interval_intersection(
			a in 0u64..64,
			b in 0u64..64,
			len in 1u64..64,
		) {
			let buffer = make_buffer(128);
			let expected = if a + len <= b || b + len <= a {
				BufferOverlap::Disjoint
			} else {
				BufferOverlap::Overlapping
			};
			prop_assert_eq!(Buffer::test_overlap(&buffer, a, len, &buffer, b, len), expected);
			prop_assert_eq!(Buffer::test_overlap(&buffer, b, len, &buffer, a, len), expected);
		}
	}
}
