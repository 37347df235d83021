// Copyright 2025 Irreducible Inc.

//! Host/device and device/device data movement.

use std::sync::Arc;

use tracing::{debug_span, instrument};

use crate::{
	buffer::{Buffer, BufferOverlap},
	command_buffer::{CommandBuffer, CommandBufferMode, TransferCommand},
	device::Device,
	error::invalid_argument,
	queue::QueueAffinity,
	semaphore::SemaphoreList,
	timeout::Timeout,
	DeviceSize, Error,
};

/// Host memory taking part in a transfer.
#[derive(Debug)]
pub enum HostSpan<'a> {
	/// Read-only memory; valid only as a transfer source.
	Shared(&'a [u8]),
	/// Writable memory; valid as a source or a target.
	Exclusive(&'a mut [u8]),
}

impl HostSpan<'_> {
	pub fn as_slice(&self) -> &[u8] {
		match self {
			Self::Shared(data) => data,
			Self::Exclusive(data) => data,
		}
	}

	pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
		match self {
			Self::Shared(_) => None,
			Self::Exclusive(data) => Some(data),
		}
	}

	pub fn len(&self) -> usize {
		self.as_slice().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// One endpoint of a transfer: either host memory or a device buffer.
///
/// Host memory has no device identity and never aliases device memory.
#[derive(Debug)]
pub enum TransferBuffer<'a> {
	Host(HostSpan<'a>),
	Device(&'a Arc<Buffer>),
}

impl<'a> TransferBuffer<'a> {
	pub fn host(data: &'a [u8]) -> Self {
		Self::Host(HostSpan::Shared(data))
	}

	pub fn host_mut(data: &'a mut [u8]) -> Self {
		Self::Host(HostSpan::Exclusive(data))
	}

	pub fn device(buffer: &'a Arc<Buffer>) -> Self {
		Self::Device(buffer)
	}

	pub fn is_host(&self) -> bool {
		matches!(self, Self::Host(_))
	}

	pub fn device_buffer(&self) -> Option<&'a Arc<Buffer>> {
		match self {
			Self::Host(_) => None,
			Self::Device(buffer) => Some(buffer),
		}
	}
}

/// Reserved transfer options. No flags are currently defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransferBufferFlags(u32);

impl TransferBufferFlags {
	pub const DEFAULT: Self = Self(0);

	pub fn bits(&self) -> u32 {
		self.0
	}
}

/// Direction of a transfer, recorded on trace spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
	HostToDevice,
	DeviceToHost,
	DeviceToDevice,
}

impl TransferDirection {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::HostToDevice => "h2d",
			Self::DeviceToHost => "d2h",
			Self::DeviceToDevice => "d2d",
		}
	}
}

impl Device {
	/// Copies `length` bytes between two endpoints, of which at least one is a device buffer.
	///
	/// Zero-length transfers succeed without touching either endpoint. Host-to-host transfers,
	/// writes into read-only host memory and overlapping ranges of the same device allocation are
	/// rejected before the backend is involved.
	#[allow(clippy::too_many_arguments)]
	pub fn transfer(
		&self,
		source: TransferBuffer<'_>,
		source_offset: DeviceSize,
		target: TransferBuffer<'_>,
		target_offset: DeviceSize,
		length: DeviceSize,
		flags: TransferBufferFlags,
		timeout: Timeout,
	) -> Result<(), Error> {
		if length == 0 {
			return Ok(());
		}

		let direction = match (source.device_buffer(), target.device_buffer()) {
			(None, None) => invalid_argument!(
				"cannot perform host->host transfers through a device; copy host memory directly"
			),
			(None, Some(_)) => TransferDirection::HostToDevice,
			(Some(_), None) => TransferDirection::DeviceToHost,
			(Some(source_buffer), Some(target_buffer)) => {
				source_buffer.calculate_range(source_offset, length)?;
				target_buffer.calculate_range(target_offset, length)?;
				if Buffer::test_overlap(
					source_buffer,
					source_offset,
					length,
					target_buffer,
					target_offset,
					length,
				) != BufferOverlap::Disjoint
				{
					invalid_argument!(
						"source and target ranges must not overlap within the same buffer"
					);
				}
				TransferDirection::DeviceToDevice
			}
		};
		if matches!(target, TransferBuffer::Host(HostSpan::Shared(_))) {
			invalid_argument!("host transfer target must be writable memory");
		}

		let _span = debug_span!(
			"transfer_range",
			device = self.id(),
			direction = direction.as_str(),
			length
		)
		.entered();
		self.backend().transfer_range(
			source,
			source_offset,
			target,
			target_offset,
			length,
			flags,
			timeout,
		)
	}

	/// Uploads `length` bytes from the start of `source` into `target`.
	pub fn transfer_h2d(
		&self,
		source: &[u8],
		target: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
		flags: TransferBufferFlags,
		timeout: Timeout,
	) -> Result<(), Error> {
		self.transfer(
			TransferBuffer::host(source),
			0,
			TransferBuffer::device(target),
			target_offset,
			length,
			flags,
			timeout,
		)
	}

	/// Downloads `length` bytes from `source` into the start of `target`.
	pub fn transfer_d2h(
		&self,
		source: &Arc<Buffer>,
		source_offset: DeviceSize,
		target: &mut [u8],
		length: DeviceSize,
		flags: TransferBufferFlags,
		timeout: Timeout,
	) -> Result<(), Error> {
		self.transfer(
			TransferBuffer::device(source),
			source_offset,
			TransferBuffer::host_mut(target),
			0,
			length,
			flags,
			timeout,
		)
	}

	#[allow(clippy::too_many_arguments)]
	pub fn transfer_d2d(
		&self,
		source: &Arc<Buffer>,
		source_offset: DeviceSize,
		target: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
		flags: TransferBufferFlags,
		timeout: Timeout,
	) -> Result<(), Error> {
		self.transfer(
			TransferBuffer::device(source),
			source_offset,
			TransferBuffer::device(target),
			target_offset,
			length,
			flags,
			timeout,
		)
	}

	/// Enqueues a device-to-device copy ordered by the given semaphores.
	///
	/// The copy is recorded into a transient one-shot command buffer which is released once
	/// submission returns, whether or not it succeeded. With no waits the command buffer is also
	/// marked for inline execution so the backend may run it immediately.
	#[allow(clippy::too_many_arguments)]
	#[instrument(skip_all, fields(device = self.id(), direction = "d2d", length = length))]
	pub fn queue_copy(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source_buffer: &Arc<Buffer>,
		source_offset: DeviceSize,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
	) -> Result<(), Error> {
		self.submit_transfer_command(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			TransferCommand::Copy {
				source_buffer: Arc::clone(source_buffer),
				source_offset,
				target_buffer: Arc::clone(target_buffer),
				target_offset,
				length,
			},
		)
	}

	/// Enqueues a fill of `target_buffer` with a repeating 1, 2 or 4 byte pattern.
	#[allow(clippy::too_many_arguments)]
	#[instrument(skip_all, fields(device = self.id(), length = length))]
	pub fn queue_fill(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
		pattern: &[u8],
	) -> Result<(), Error> {
		self.submit_transfer_command(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			TransferCommand::Fill {
				target_buffer: Arc::clone(target_buffer),
				target_offset,
				length,
				pattern: pattern.to_vec(),
			},
		)
	}

	/// Enqueues a write of host bytes, captured at call time, into `target_buffer`.
	#[instrument(skip_all, fields(device = self.id(), direction = "h2d", length = source.len()))]
	pub fn queue_update(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source: &[u8],
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
	) -> Result<(), Error> {
		self.submit_transfer_command(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			TransferCommand::Update {
				source: source.to_vec(),
				target_buffer: Arc::clone(target_buffer),
				target_offset,
			},
		)
	}

	fn submit_transfer_command(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		command: TransferCommand,
	) -> Result<(), Error> {
		let mut mode = CommandBufferMode::ONE_SHOT;
		if wait_semaphores.is_empty() {
			mode |= CommandBufferMode::ALLOW_INLINE_EXECUTION;
		}

		let command_buffer = CommandBuffer::transfer(mode, queue_affinity, [command])?;
		let result = self.queue_execute(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			std::slice::from_ref(&command_buffer),
		);
		drop(command_buffer);
		result
	}
}
