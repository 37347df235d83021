// Copyright 2025 Irreducible Inc.

use std::sync::Arc;

use bitflags::bitflags;

use crate::{
	buffer::{Buffer, BufferOverlap, BufferUsage},
	error::{ensure_argument, invalid_argument},
	queue::QueueAffinity,
	resource::{Resource, ResourceId},
	DeviceSize, Error,
};

bitflags! {
	/// Recording and submission behavior of a command buffer.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct CommandBufferMode: u32 {
		/// Submitted at most once.
		const ONE_SHOT = 1 << 0;
		/// The backend may execute the commands during submission, before the call returns.
		/// Such a command buffer must not be submitted with a non-empty wait list.
		const ALLOW_INLINE_EXECUTION = 1 << 4;
		/// Recording skips range and usage validation.
		const UNVALIDATED = 1 << 5;
	}
}

/// A recorded transfer operation.
#[derive(Debug, Clone)]
pub enum TransferCommand {
	/// Repeats a 1, 2 or 4 byte pattern over the target range.
	Fill {
		target_buffer: Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
		pattern: Vec<u8>,
	},
	/// Writes host bytes captured at record time.
	Update {
		source: Vec<u8>,
		target_buffer: Arc<Buffer>,
		target_offset: DeviceSize,
	},
	/// Copies between two device buffers whose ranges must be disjoint.
	Copy {
		source_buffer: Arc<Buffer>,
		source_offset: DeviceSize,
		target_buffer: Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
	},
}

impl TransferCommand {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Fill { .. } => "fill",
			Self::Update { .. } => "update",
			Self::Copy { .. } => "copy",
		}
	}

	/// Bytes written by the command.
	pub fn length(&self) -> DeviceSize {
		match self {
			Self::Fill { length, .. } | Self::Copy { length, .. } => *length,
			Self::Update { source, .. } => source.len() as DeviceSize,
		}
	}

	/// Checks ranges, usages and the fill pattern width.
	pub fn validate(&self) -> Result<(), Error> {
		match self {
			Self::Fill {
				target_buffer,
				target_offset,
				length,
				pattern,
			} => {
				ensure_argument!(
					matches!(pattern.len(), 1 | 2 | 4),
					"fill pattern must be 1, 2 or 4 bytes, got {}",
					pattern.len()
				);
				ensure_argument!(
					*target_offset % pattern.len() as DeviceSize == 0
						&& *length % pattern.len() as DeviceSize == 0,
					"fill offset {target_offset} and length {length} must be aligned to the {} byte pattern",
					pattern.len()
				);
				target_buffer.validate_usage(BufferUsage::TRANSFER_TARGET)?;
				target_buffer.calculate_range(*target_offset, *length)?;
			}
			Self::Update {
				source,
				target_buffer,
				target_offset,
			} => {
				target_buffer.validate_usage(BufferUsage::TRANSFER_TARGET)?;
				target_buffer.calculate_range(*target_offset, source.len() as DeviceSize)?;
			}
			Self::Copy {
				source_buffer,
				source_offset,
				target_buffer,
				target_offset,
				length,
			} => {
				source_buffer.validate_usage(BufferUsage::TRANSFER_SOURCE)?;
				target_buffer.validate_usage(BufferUsage::TRANSFER_TARGET)?;
				source_buffer.calculate_range(*source_offset, *length)?;
				target_buffer.calculate_range(*target_offset, *length)?;
				if Buffer::test_overlap(
					source_buffer,
					*source_offset,
					*length,
					target_buffer,
					*target_offset,
					*length,
				) != BufferOverlap::Disjoint
				{
					invalid_argument!(
						"copy source and target ranges must not overlap within the same buffer"
					);
				}
			}
		}
		Ok(())
	}

	fn buffers(&self) -> impl Iterator<Item = &Arc<Buffer>> {
		let (first, second) = match self {
			Self::Fill { target_buffer, .. } | Self::Update { target_buffer, .. } => {
				(target_buffer, None)
			}
			Self::Copy {
				source_buffer,
				target_buffer,
				..
			} => (source_buffer, Some(target_buffer)),
		};
		std::iter::once(first).chain(second)
	}
}

/// A recorded, immutable sequence of device operations.
///
/// Command buffers hold strong references to every buffer they touch.
#[derive(Debug)]
pub struct CommandBuffer {
	id: ResourceId,
	mode: CommandBufferMode,
	queue_affinity: QueueAffinity,
	commands: Vec<TransferCommand>,
}

impl CommandBuffer {
	pub fn builder(mode: CommandBufferMode, queue_affinity: QueueAffinity) -> CommandBufferBuilder {
		CommandBufferBuilder {
			mode,
			queue_affinity,
			commands: Vec::new(),
		}
	}

	/// Records `commands` into a new command buffer.
	pub fn transfer(
		mode: CommandBufferMode,
		queue_affinity: QueueAffinity,
		commands: impl IntoIterator<Item = TransferCommand>,
	) -> Result<Arc<Self>, Error> {
		let mut builder = Self::builder(mode, queue_affinity);
		for command in commands {
			builder.record(command)?;
		}
		Ok(builder.finish())
	}

	pub fn id(&self) -> ResourceId {
		self.id
	}

	pub fn mode(&self) -> CommandBufferMode {
		self.mode
	}

	pub fn queue_affinity(&self) -> QueueAffinity {
		self.queue_affinity
	}

	pub fn commands(&self) -> &[TransferCommand] {
		&self.commands
	}

	pub fn allows_inline_execution(&self) -> bool {
		self.mode.contains(CommandBufferMode::ALLOW_INLINE_EXECUTION)
	}

	/// Every buffer referenced by a recorded command.
	pub fn buffers(&self) -> impl Iterator<Item = &Arc<Buffer>> {
		self.commands.iter().flat_map(TransferCommand::buffers)
	}
}

impl Resource for CommandBuffer {
	fn resource_id(&self) -> ResourceId {
		self.id
	}
}

/// Records commands for a [`CommandBuffer`].
#[derive(Debug)]
pub struct CommandBufferBuilder {
	mode: CommandBufferMode,
	queue_affinity: QueueAffinity,
	commands: Vec<TransferCommand>,
}

impl CommandBufferBuilder {
	pub fn record(&mut self, command: TransferCommand) -> Result<&mut Self, Error> {
		if !self.mode.contains(CommandBufferMode::UNVALIDATED) {
			command.validate()?;
		}
		self.commands.push(command);
		Ok(self)
	}

	pub fn fill_buffer(
		&mut self,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
		pattern: &[u8],
	) -> Result<&mut Self, Error> {
		self.record(TransferCommand::Fill {
			target_buffer: Arc::clone(target_buffer),
			target_offset,
			length,
			pattern: pattern.to_vec(),
		})
	}

	pub fn update_buffer(
		&mut self,
		source: &[u8],
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
	) -> Result<&mut Self, Error> {
		self.record(TransferCommand::Update {
			source: source.to_vec(),
			target_buffer: Arc::clone(target_buffer),
			target_offset,
		})
	}

	pub fn copy_buffer(
		&mut self,
		source_buffer: &Arc<Buffer>,
		source_offset: DeviceSize,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
	) -> Result<&mut Self, Error> {
		self.record(TransferCommand::Copy {
			source_buffer: Arc::clone(source_buffer),
			source_offset,
			target_buffer: Arc::clone(target_buffer),
			target_offset,
			length,
		})
	}

	pub fn finish(self) -> Arc<CommandBuffer> {
		Arc::new(CommandBuffer {
			id: ResourceId::next(),
			mode: self.mode,
			queue_affinity: self.queue_affinity,
			commands: self.commands,
		})
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::buffer::{Allocation, MemoryType};

	fn make_buffer(size: DeviceSize) -> Arc<Buffer> {
		Buffer::new(Allocation::new(size, MemoryType::DEVICE_LOCAL, BufferUsage::DEFAULT, ()))
	}

	#[test]
	fn test_record_commands() {
		let a = make_buffer(64);
		let b = make_buffer(64);

		let mut builder = CommandBuffer::builder(CommandBufferMode::ONE_SHOT, QueueAffinity::ANY);
		builder
			.fill_buffer(&a, 0, 16, &[0xAB])
			.unwrap()
			.update_buffer(&[1, 2, 3], &b, 8)
			.unwrap()
			.copy_buffer(&a, 0, &b, 32, 32)
			.unwrap();
		let command_buffer = builder.finish();

		assert_eq!(command_buffer.commands().len(), 3);
		assert_eq!(command_buffer.buffers().count(), 4);
		assert!(!command_buffer.allows_inline_execution());
		assert_eq!(command_buffer.commands()[1].length(), 3);
	}

	#[test]
	fn test_reject_invalid_commands() {
		let a = make_buffer(64);
		let mut builder = CommandBuffer::builder(CommandBufferMode::ONE_SHOT, QueueAffinity::ANY);

		assert_matches!(builder.fill_buffer(&a, 0, 16, &[1, 2, 3]), Err(Error::InvalidArgument(_)));
		assert_matches!(builder.fill_buffer(&a, 2, 16, &[1, 2, 3, 4]), Err(Error::InvalidArgument(_)));
		assert_matches!(builder.update_buffer(&[0; 8], &a, 60), Err(Error::OutOfRange(_)));
		assert_matches!(builder.copy_buffer(&a, 0, &a, 8, 16), Err(Error::InvalidArgument(_)));
		assert!(builder.copy_buffer(&a, 0, &a, 32, 32).is_ok());
	}

	#[test]
	fn test_unvalidated_mode_skips_checks() {
		let a = make_buffer(16);
		let command_buffer = CommandBuffer::transfer(
			CommandBufferMode::ONE_SHOT | CommandBufferMode::UNVALIDATED,
			QueueAffinity::ANY,
			[TransferCommand::Fill {
				target_buffer: a,
				target_offset: 0,
				length: 64,
				pattern: vec![0],
			}],
		)
		.unwrap();
		assert_eq!(command_buffer.commands().len(), 1);
	}
}
