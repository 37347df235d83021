// Copyright 2025 Irreducible Inc.

use std::{
	ops::Range,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, RwLock,
	},
};

use bytemuck::zeroed_vec;

use crate::{buffer::Buffer, error::invalid_argument, DeviceSize, Error};

/// Running totals shared between a heap allocator and the storage it hands out.
#[derive(Debug, Default)]
pub(super) struct HeapStats {
	pub allocated: AtomicU64,
	pub freed: AtomicU64,
	pub peak_live: AtomicU64,
}

impl HeapStats {
	fn record_alloc(&self, size: u64) {
		let allocated = self.allocated.fetch_add(size, Ordering::Relaxed) + size;
		let live = allocated - self.freed.load(Ordering::Relaxed);
		self.peak_live.fetch_max(live, Ordering::Relaxed);
	}
}

/// Host memory backing a CPU device allocation.
#[derive(Debug)]
pub(super) struct HeapStorage {
	bytes: RwLock<Vec<u8>>,
	stats: Arc<HeapStats>,
}

impl HeapStorage {
	pub fn zeroed(len: usize, stats: Arc<HeapStats>) -> Self {
		stats.record_alloc(len as u64);
		Self {
			bytes: RwLock::new(zeroed_vec(len)),
			stats,
		}
	}
}

impl Drop for HeapStorage {
	fn drop(&mut self) {
		let len = self.bytes.get_mut().map_or(0, |bytes| bytes.len());
		self.stats.freed.fetch_add(len as u64, Ordering::Relaxed);
	}
}

fn storage_of(buffer: &Buffer) -> Result<&HeapStorage, Error> {
	match buffer.allocation().storage::<HeapStorage>() {
		Some(storage) => Ok(storage),
		None => invalid_argument!("buffer {} was not allocated by a CPU device", buffer.id()),
	}
}

fn host_range(
	buffer: &Buffer,
	offset: DeviceSize,
	length: DeviceSize,
) -> Result<Range<usize>, Error> {
	let range = buffer.calculate_range(offset, length)?;
	match (usize::try_from(range.start), usize::try_from(range.end)) {
		(Ok(start), Ok(end)) => Ok(start..end),
		_ => Err(Error::OutOfRange(format!(
			"range {range:?} of buffer {} is not host addressable",
			buffer.id()
		))),
	}
}

/// Resolves `[offset, offset + length)` of a host span.
pub(super) fn span_range(
	span_len: usize,
	offset: DeviceSize,
	length: DeviceSize,
) -> Result<Range<usize>, Error> {
	let range = usize::try_from(offset)
		.ok()
		.zip(usize::try_from(length).ok())
		.and_then(|(offset, length)| Some(offset..offset.checked_add(length)?))
		.filter(|range| range.end <= span_len);
	range.ok_or_else(|| {
		Error::OutOfRange(format!(
			"host range [{offset}, {offset}+{length}) exceeds host span of length {span_len}"
		))
	})
}

pub(super) fn read(buffer: &Buffer, offset: DeviceSize, target: &mut [u8]) -> Result<(), Error> {
	let range = host_range(buffer, offset, target.len() as DeviceSize)?;
	let bytes = storage_of(buffer)?
		.bytes
		.read()
		.expect("lock is always available");
	target.copy_from_slice(&bytes[range]);
	Ok(())
}

pub(super) fn write(buffer: &Buffer, offset: DeviceSize, source: &[u8]) -> Result<(), Error> {
	let range = host_range(buffer, offset, source.len() as DeviceSize)?;
	let mut bytes = storage_of(buffer)?
		.bytes
		.write()
		.expect("lock is always available");
	bytes[range].copy_from_slice(source);
	Ok(())
}

/// Runs `f` with the bytes of `[offset, offset + length)` of `buffer`.
pub(super) fn with_bytes<R>(
	buffer: &Buffer,
	offset: DeviceSize,
	length: DeviceSize,
	f: impl FnOnce(&[u8]) -> R,
) -> Result<R, Error> {
	let range = host_range(buffer, offset, length)?;
	let bytes = storage_of(buffer)?
		.bytes
		.read()
		.expect("lock is always available");
	Ok(f(&bytes[range]))
}

/// Runs `f` with the mutable bytes of `[offset, offset + length)` of `buffer`.
pub(super) fn with_bytes_mut<R>(
	buffer: &Buffer,
	offset: DeviceSize,
	length: DeviceSize,
	f: impl FnOnce(&mut [u8]) -> R,
) -> Result<R, Error> {
	let range = host_range(buffer, offset, length)?;
	let mut bytes = storage_of(buffer)?
		.bytes
		.write()
		.expect("lock is always available");
	Ok(f(&mut bytes[range]))
}

pub(super) fn fill(
	buffer: &Buffer,
	offset: DeviceSize,
	length: DeviceSize,
	pattern: &[u8],
) -> Result<(), Error> {
	if pattern.is_empty() {
		invalid_argument!("fill pattern must not be empty");
	}
	with_bytes_mut(buffer, offset, length, |bytes| {
		for chunk in bytes.chunks_mut(pattern.len()) {
			chunk.copy_from_slice(&pattern[..chunk.len()]);
		}
	})
}

/// Copies between two buffers. Ranges within one allocation must be disjoint.
pub(super) fn copy(
	source: &Buffer,
	source_offset: DeviceSize,
	target: &Buffer,
	target_offset: DeviceSize,
	length: DeviceSize,
) -> Result<(), Error> {
	let source_range = host_range(source, source_offset, length)?;
	let target_range = host_range(target, target_offset, length)?;
	let source_storage = storage_of(source)?;
	let target_storage = storage_of(target)?;

	if std::ptr::eq(source_storage, target_storage) {
		let mut bytes = target_storage
			.bytes
			.write()
			.expect("lock is always available");
		bytes.copy_within(source_range, target_range.start);
		return Ok(());
	}

	// Locks are taken in allocation order so concurrent copies in opposite directions cannot
	// deadlock.
	let copy_bytes = |source_bytes: &[u8], target_bytes: &mut [u8]| {
		target_bytes[target_range.clone()].copy_from_slice(&source_bytes[source_range.clone()]);
	};
	if source.allocation().id() < target.allocation().id() {
		let source_bytes = source_storage.bytes.read().expect("lock is always available");
		let mut target_bytes = target_storage.bytes.write().expect("lock is always available");
		copy_bytes(&source_bytes, &mut target_bytes);
	} else {
		let mut target_bytes = target_storage.bytes.write().expect("lock is always available");
		let source_bytes = source_storage.bytes.read().expect("lock is always available");
		copy_bytes(&source_bytes, &mut target_bytes);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::buffer::{Allocation, BufferUsage, MemoryType};

	fn make_buffer(len: usize, stats: &Arc<HeapStats>) -> Arc<Buffer> {
		Buffer::new(Allocation::new(
			len as DeviceSize,
			MemoryType::HOST_LOCAL,
			BufferUsage::DEFAULT,
			HeapStorage::zeroed(len, Arc::clone(stats)),
		))
	}

	#[test]
	fn test_read_write_fill_copy() {
		let stats = Arc::new(HeapStats::default());
		let a = make_buffer(16, &stats);
		let b = make_buffer(16, &stats);

		write(&a, 4, &[1, 2, 3, 4]).unwrap();
		fill(&a, 8, 8, &[0xAA, 0xBB]).unwrap();
		copy(&a, 4, &b, 0, 12).unwrap();

		let mut out = [0u8; 12];
		read(&b, 0, &mut out).unwrap();
		assert_eq!(out, [1, 2, 3, 4, 0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB]);

		// Disjoint ranges of the same allocation.
		copy(&a, 4, &a, 0, 4).unwrap();
		let mut head = [0u8; 4];
		read(&a, 0, &mut head).unwrap();
		assert_eq!(head, [1, 2, 3, 4]);
	}

	#[test]
	fn test_out_of_range_access() {
		let stats = Arc::new(HeapStats::default());
		let a = make_buffer(8, &stats);
		assert_matches!(write(&a, 6, &[0; 4]), Err(Error::OutOfRange(_)));
		assert_matches!(span_range(8, 4, 5), Err(Error::OutOfRange(_)));
		assert_eq!(span_range(8, 4, 4).unwrap(), 4..8);
	}

	#[test]
	fn test_foreign_storage_is_rejected() {
		let foreign = Buffer::new(Allocation::new(8, MemoryType::DEVICE_LOCAL, BufferUsage::DEFAULT, ()));
		assert_matches!(read(&foreign, 0, &mut [0; 4]), Err(Error::InvalidArgument(_)));
	}

	#[test]
	fn test_stats_track_release() {
		let stats = Arc::new(HeapStats::default());
		let a = make_buffer(32, &stats);
		let view = a.subspan(0, 16).unwrap();
		drop(a);
		assert_eq!(stats.freed.load(Ordering::Relaxed), 0);
		drop(view);
		assert_eq!(stats.allocated.load(Ordering::Relaxed), 32);
		assert_eq!(stats.freed.load(Ordering::Relaxed), 32);
		assert_eq!(stats.peak_live.load(Ordering::Relaxed), 32);
	}
}
