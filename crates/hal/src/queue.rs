// Copyright 2025 Irreducible Inc.

//! Queue-ordered submission of work.
//!
//! Work submitted here starts once every timepoint of its wait list is reached and, when finished,
//! signals every timepoint of its signal list. Ordering between submissions is expressed only
//! through these timepoints; two submissions without a semaphore dependency may run in either
//! order, even on the same queue.

use std::{fmt, sync::Arc};

use tracing::instrument;

use crate::{
	allocator::AllocatorPool,
	buffer::{Buffer, BufferParams},
	command_buffer::CommandBuffer,
	device::Device,
	error::invalid_argument,
	file::File,
	semaphore::SemaphoreList,
	DeviceSize, Error,
};

/// Bitmask selecting the queues of a device a submission may run on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueAffinity(u64);

impl QueueAffinity {
	pub const ANY: Self = Self(u64::MAX);
	pub const NONE: Self = Self(0);

	pub const fn from_bits(bits: u64) -> Self {
		Self(bits)
	}

	/// Affinity for the single queue `index`. Indices past 63 wrap.
	pub const fn queue(index: u32) -> Self {
		Self(1 << (index % u64::BITS))
	}

	pub const fn bits(&self) -> u64 {
		self.0
	}

	pub fn is_any(&self) -> bool {
		*self == Self::ANY
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	pub fn contains_queue(&self, index: u32) -> bool {
		index < u64::BITS && self.0 & (1 << index) != 0
	}

	/// Restricts the mask to the first `queue_count` queues.
	pub fn restrict(&self, queue_count: usize) -> Self {
		match queue_count {
			0 => Self::NONE,
			count if count >= u64::BITS as usize => *self,
			count => Self(self.0 & ((1u64 << count) - 1)),
		}
	}

	/// Index of the lowest selected queue.
	pub fn first_queue(&self) -> Option<u32> {
		(!self.is_empty()).then(|| self.0.trailing_zeros())
	}
}

impl fmt::Debug for QueueAffinity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_any() {
			write!(f, "QueueAffinity(ANY)")
		} else {
			write!(f, "QueueAffinity({:#b})", self.0)
		}
	}
}

impl std::ops::BitOr for QueueAffinity {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

fn validate_lists(wait: &SemaphoreList<'_>, signal: &SemaphoreList<'_>) -> Result<(), Error> {
	wait.validate("wait")?;
	signal.validate("signal")
}

impl Device {
	/// Enqueues `command_buffers` for execution.
	///
	/// A command buffer allowing inline execution may already be running by the time a wait
	/// would apply, so any such command buffer in the batch combined with a non-empty wait list
	/// rejects the whole batch before anything is submitted.
	#[instrument(skip_all, fields(device = self.id(), command_buffers = command_buffers.len()))]
	pub fn queue_execute(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		command_buffers: &[Arc<CommandBuffer>],
	) -> Result<(), Error> {
		validate_lists(&wait_semaphores, &signal_semaphores)?;

		if !wait_semaphores.is_empty() {
			if let Some(inline) = command_buffers
				.iter()
				.find(|command_buffer| command_buffer.allows_inline_execution())
			{
				invalid_argument!(
					"inline command buffer {} submitted with a wait; inline command buffers must be \
					 ready to execute immediately",
					inline.id()
				);
			}
		}

		self.backend().queue_execute(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			command_buffers,
		)
	}

	/// A submission with no work: signals `signal_semaphores` once `wait_semaphores` are reached.
	#[instrument(skip_all, fields(device = self.id()))]
	pub fn queue_barrier(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
	) -> Result<(), Error> {
		self.queue_execute(queue_affinity, wait_semaphores, signal_semaphores, &[])
	}

	/// Asks the backend to make progress on already-queued work.
	#[instrument(skip_all, fields(device = self.id()))]
	pub fn queue_flush(&self, queue_affinity: QueueAffinity) -> Result<(), Error> {
		self.backend().queue_flush(queue_affinity)
	}

	/// Allocates a buffer in queue order.
	///
	/// The returned handle is valid immediately, but its contents may only be used by work
	/// ordered after `signal_semaphores`.
	#[allow(clippy::too_many_arguments)]
	#[instrument(skip_all, fields(device = self.id(), allocation_size = allocation_size))]
	pub fn queue_alloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		pool: AllocatorPool,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error> {
		validate_lists(&wait_semaphores, &signal_semaphores)?;
		self.backend().queue_alloca(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			pool,
			params,
			allocation_size,
		)
	}

	/// Releases `buffer` in queue order, once `wait_semaphores` are reached.
	#[instrument(skip_all, fields(device = self.id(), buffer = %buffer.id()))]
	pub fn queue_dealloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		buffer: &Arc<Buffer>,
	) -> Result<(), Error> {
		validate_lists(&wait_semaphores, &signal_semaphores)?;
		self.backend()
			.queue_dealloca(queue_affinity, wait_semaphores, signal_semaphores, buffer)
	}

	/// Reads `length` bytes of `source_file` into `target_buffer` in queue order.
	#[allow(clippy::too_many_arguments)]
	#[instrument(skip_all, fields(device = self.id(), length = length))]
	pub fn queue_read(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source_file: &Arc<dyn File>,
		source_offset: u64,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
	) -> Result<(), Error> {
		validate_lists(&wait_semaphores, &signal_semaphores)?;
		self.backend().queue_read(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			source_file,
			source_offset,
			target_buffer,
			target_offset,
			length,
		)
	}

	/// Writes `length` bytes of `source_buffer` into `target_file` in queue order.
	#[allow(clippy::too_many_arguments)]
	#[instrument(skip_all, fields(device = self.id(), length = length))]
	pub fn queue_write(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source_buffer: &Arc<Buffer>,
		source_offset: DeviceSize,
		target_file: &Arc<dyn File>,
		target_offset: u64,
		length: DeviceSize,
	) -> Result<(), Error> {
		validate_lists(&wait_semaphores, &signal_semaphores)?;
		self.backend().queue_write(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			source_buffer,
			source_offset,
			target_file,
			target_offset,
			length,
		)
	}
}
