// Copyright 2025 Irreducible Inc.

//! A backend that records every call it receives.
//!
//! Queue operations complete during submission: the wait list is not consulted and the signal list
//! is signaled from the host before the call returns. Failures can be injected to check that
//! backend errors reach the caller unchanged.

use std::{
	collections::VecDeque,
	sync::{Arc, Mutex, RwLock, Weak},
};

use gantry_hal::{
	channel::ChannelProvider,
	cpu::HeapAllocator,
	profiling::ProfilingOptions,
	resource::ResourceId,
	transfer::TransferDirection,
	Allocator, AllocatorPool, Buffer, BufferParams, CommandBuffer, CommandBufferMode,
	DeviceBackend, DeviceCapabilities, DeviceSize, Error, File, HostAllocator, QueueAffinity,
	Semaphore, SemaphoreCompatibility, SemaphoreList, Timeout, TransferBuffer, TransferBufferFlags,
	WaitMode,
};

/// A command buffer as observed at submission.
#[derive(Debug, Clone)]
pub struct RecordedCommandBuffer {
	pub id: ResourceId,
	pub mode: CommandBufferMode,
	pub command_count: usize,
	pub handle: Weak<CommandBuffer>,
}

#[derive(Debug, Clone)]
pub enum BackendCall {
	TransferRange {
		direction: TransferDirection,
		source_offset: DeviceSize,
		target_offset: DeviceSize,
		length: DeviceSize,
	},
	QueueAlloca {
		queue_affinity: QueueAffinity,
		waits: usize,
		signals: usize,
		size: DeviceSize,
	},
	QueueDealloca {
		queue_affinity: QueueAffinity,
		buffer: ResourceId,
	},
	QueueRead {
		length: DeviceSize,
	},
	QueueWrite {
		length: DeviceSize,
	},
	QueueExecute {
		queue_affinity: QueueAffinity,
		waits: usize,
		signals: usize,
		command_buffers: Vec<RecordedCommandBuffer>,
	},
	QueueFlush,
	WaitSemaphores {
		mode: WaitMode,
		count: usize,
	},
	Query {
		category: String,
		key: String,
	},
	Trim,
	ProfilingBegin,
	ProfilingEnd,
}

#[derive(Debug)]
pub struct RecordingBackend {
	id: String,
	capabilities: DeviceCapabilities,
	calls: Mutex<Vec<BackendCall>>,
	injected_failures: Mutex<VecDeque<Error>>,
	allocator: RwLock<Arc<dyn Allocator>>,
}

impl RecordingBackend {
	pub fn new(id: impl Into<String>) -> Arc<Self> {
		Self::with_capabilities(id, DeviceCapabilities::default())
	}

	pub fn with_capabilities(id: impl Into<String>, capabilities: DeviceCapabilities) -> Arc<Self> {
		let id = id.into();
		Arc::new(Self {
			allocator: RwLock::new(Arc::new(HeapAllocator::new(format!("{id}-heap")))),
			id,
			capabilities,
			calls: Mutex::default(),
			injected_failures: Mutex::default(),
		})
	}

	/// Makes the next recorded call fail with `error`, after it has been recorded.
	pub fn inject_failure(&self, error: Error) {
		self.injected_failures.lock().unwrap().push_back(error);
	}

	pub fn calls(&self) -> Vec<BackendCall> {
		self.calls.lock().unwrap().clone()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().unwrap().len()
	}

	pub fn clear_calls(&self) {
		self.calls.lock().unwrap().clear();
	}

	fn record(&self, call: BackendCall) -> Result<(), Error> {
		self.calls.lock().unwrap().push(call);
		match self.injected_failures.lock().unwrap().pop_front() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	fn complete(&self, signal_semaphores: SemaphoreList<'_>) -> Result<(), Error> {
		signal_semaphores.signal_on_host()
	}
}

impl DeviceBackend for RecordingBackend {
	fn id(&self) -> &str {
		&self.id
	}

	fn capabilities(&self) -> DeviceCapabilities {
		self.capabilities
	}

	fn host_allocator(&self) -> HostAllocator {
		HostAllocator::default()
	}

	fn device_allocator(&self) -> Arc<dyn Allocator> {
		Arc::clone(&self.allocator.read().unwrap())
	}

	fn replace_device_allocator(&self, new_allocator: Arc<dyn Allocator>) {
		*self.allocator.write().unwrap() = new_allocator;
	}

	fn replace_channel_provider(&self, _new_provider: Option<Arc<dyn ChannelProvider>>) {}

	fn trim(&self) -> Result<(), Error> {
		self.record(BackendCall::Trim)
	}

	fn query_i64(&self, category: &str, key: &str) -> Result<i64, Error> {
		self.record(BackendCall::Query {
			category: category.to_string(),
			key: key.to_string(),
		})?;
		Err(Error::NotFound(format!("{category}::{key}")))
	}

	fn query_semaphore_compatibility(&self, _semaphore: &Semaphore) -> SemaphoreCompatibility {
		SemaphoreCompatibility::HOST_ONLY
	}

	fn transfer_range(
		&self,
		source: TransferBuffer<'_>,
		source_offset: DeviceSize,
		target: TransferBuffer<'_>,
		target_offset: DeviceSize,
		data_length: DeviceSize,
		_flags: TransferBufferFlags,
		_timeout: Timeout,
	) -> Result<(), Error> {
		let direction = match (source.is_host(), target.is_host()) {
			(true, _) => TransferDirection::HostToDevice,
			(false, true) => TransferDirection::DeviceToHost,
			(false, false) => TransferDirection::DeviceToDevice,
		};
		self.record(BackendCall::TransferRange {
			direction,
			source_offset,
			target_offset,
			length: data_length,
		})
	}

	fn queue_alloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		_pool: AllocatorPool,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error> {
		self.record(BackendCall::QueueAlloca {
			queue_affinity,
			waits: wait_semaphores.len(),
			signals: signal_semaphores.len(),
			size: allocation_size,
		})?;
		let buffer = self
			.device_allocator()
			.allocate_buffer(params, allocation_size)?;
		self.complete(signal_semaphores)?;
		Ok(buffer)
	}

	fn queue_dealloca(
		&self,
		queue_affinity: QueueAffinity,
		_wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		buffer: &Arc<Buffer>,
	) -> Result<(), Error> {
		self.record(BackendCall::QueueDealloca {
			queue_affinity,
			buffer: buffer.id(),
		})?;
		self.complete(signal_semaphores)
	}

	fn queue_read(
		&self,
		_queue_affinity: QueueAffinity,
		_wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		_source_file: &Arc<dyn File>,
		_source_offset: u64,
		_target_buffer: &Arc<Buffer>,
		_target_offset: DeviceSize,
		length: DeviceSize,
	) -> Result<(), Error> {
		self.record(BackendCall::QueueRead { length })?;
		self.complete(signal_semaphores)
	}

	fn queue_write(
		&self,
		_queue_affinity: QueueAffinity,
		_wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		_source_buffer: &Arc<Buffer>,
		_source_offset: DeviceSize,
		_target_file: &Arc<dyn File>,
		_target_offset: u64,
		length: DeviceSize,
	) -> Result<(), Error> {
		self.record(BackendCall::QueueWrite { length })?;
		self.complete(signal_semaphores)
	}

	fn queue_execute(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		command_buffers: &[Arc<CommandBuffer>],
	) -> Result<(), Error> {
		let command_buffers = command_buffers
			.iter()
			.map(|command_buffer| RecordedCommandBuffer {
				id: command_buffer.id(),
				mode: command_buffer.mode(),
				command_count: command_buffer.commands().len(),
				handle: Arc::downgrade(command_buffer),
			})
			.collect();
		self.record(BackendCall::QueueExecute {
			queue_affinity,
			waits: wait_semaphores.len(),
			signals: signal_semaphores.len(),
			command_buffers,
		})?;
		self.complete(signal_semaphores)
	}

	fn queue_flush(&self, _queue_affinity: QueueAffinity) -> Result<(), Error> {
		self.record(BackendCall::QueueFlush)
	}

	fn wait_semaphores(
		&self,
		wait_mode: WaitMode,
		semaphores: SemaphoreList<'_>,
		timeout: Timeout,
	) -> Result<(), Error> {
		self.record(BackendCall::WaitSemaphores {
			mode: wait_mode,
			count: semaphores.len(),
		})?;
		semaphores.wait_on_host(wait_mode, timeout)
	}

	fn profiling_begin(&self, _options: &ProfilingOptions) -> Result<(), Error> {
		self.record(BackendCall::ProfilingBegin)
	}

	fn profiling_end(&self) -> Result<(), Error> {
		self.record(BackendCall::ProfilingEnd)
	}
}
