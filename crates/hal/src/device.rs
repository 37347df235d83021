// Copyright 2025 Irreducible Inc.

use std::{fmt::Debug, sync::Arc};

use tracing::instrument;

use crate::{
	allocator::{Allocator, AllocatorPool, HostAllocator},
	buffer::{Buffer, BufferParams},
	channel::ChannelProvider,
	command_buffer::CommandBuffer,
	file::File,
	profiling::ProfilingOptions,
	queue::QueueAffinity,
	semaphore::{Semaphore, SemaphoreCompatibility, SemaphoreList, WaitMode},
	timeout::Timeout,
	transfer::{TransferBuffer, TransferBufferFlags},
	DeviceSize, Error,
};

/// Query category answered by [`Device::query_i64`] itself: the key is matched as a wildcard
/// pattern against the device identifier.
pub const DEVICE_ID_CATEGORY: &str = "hal.device.id";

/// Query category exposing [`DeviceCapabilities`] fields.
pub const DEVICE_CAPABILITY_CATEGORY: &str = "hal.device.capability";

/// Static traits of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
	/// Number of queues addressable through a [`QueueAffinity`].
	pub queue_count: usize,
	/// Whether command buffers marked for inline execution may run during submission.
	pub inline_execution: bool,
	/// Whether ahead-of-time encoding may shrink tile sizes to narrow static shapes for this
	/// backend. Some backends mis-handle the narrowed layouts and clear this flag.
	pub narrow_tile_adjustment: bool,
}

impl Default for DeviceCapabilities {
	fn default() -> Self {
		Self {
			queue_count: 1,
			inline_execution: false,
			narrow_tile_adjustment: true,
		}
	}
}

/// The capability contract every device backend implements.
///
/// Methods are only invoked after [`Device`] has validated their arguments: semaphore lists are
/// well formed, transfers are non-empty, not host-to-host and not overlapping, and inline command
/// buffers are never submitted with a wait. Backends must be safe to call concurrently.
pub trait DeviceBackend: Debug + Send + Sync {
	fn id(&self) -> &str;

	fn capabilities(&self) -> DeviceCapabilities {
		DeviceCapabilities::default()
	}

	fn host_allocator(&self) -> HostAllocator;

	fn device_allocator(&self) -> Arc<dyn Allocator>;

	fn replace_device_allocator(&self, new_allocator: Arc<dyn Allocator>);

	fn replace_channel_provider(&self, new_provider: Option<Arc<dyn ChannelProvider>>);

	fn trim(&self) -> Result<(), Error>;

	fn query_i64(&self, category: &str, key: &str) -> Result<i64, Error>;

	fn create_semaphore(&self, initial_value: u64) -> Result<Arc<Semaphore>, Error> {
		Ok(Semaphore::new(initial_value))
	}

	fn query_semaphore_compatibility(&self, semaphore: &Semaphore) -> SemaphoreCompatibility;

	#[allow(clippy::too_many_arguments)]
	fn transfer_range(
		&self,
		source: TransferBuffer<'_>,
		source_offset: DeviceSize,
		target: TransferBuffer<'_>,
		target_offset: DeviceSize,
		data_length: DeviceSize,
		flags: TransferBufferFlags,
		timeout: Timeout,
	) -> Result<(), Error>;

	#[allow(clippy::too_many_arguments)]
	fn queue_alloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		pool: AllocatorPool,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error>;

	fn queue_dealloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		buffer: &Arc<Buffer>,
	) -> Result<(), Error>;

	#[allow(clippy::too_many_arguments)]
	fn queue_read(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source_file: &Arc<dyn File>,
		source_offset: u64,
		target_buffer: &Arc<Buffer>,
		target_offset: DeviceSize,
		length: DeviceSize,
	) -> Result<(), Error>;

	#[allow(clippy::too_many_arguments)]
	fn queue_write(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		source_buffer: &Arc<Buffer>,
		source_offset: DeviceSize,
		target_file: &Arc<dyn File>,
		target_offset: u64,
		length: DeviceSize,
	) -> Result<(), Error>;

	fn queue_execute(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		command_buffers: &[Arc<CommandBuffer>],
	) -> Result<(), Error>;

	fn queue_flush(&self, queue_affinity: QueueAffinity) -> Result<(), Error>;

	fn wait_semaphores(
		&self,
		wait_mode: WaitMode,
		semaphores: SemaphoreList<'_>,
		timeout: Timeout,
	) -> Result<(), Error>;

	fn profiling_begin(&self, options: &ProfilingOptions) -> Result<(), Error>;

	fn profiling_end(&self) -> Result<(), Error>;
}

/// A shared handle to a device.
///
/// Cloning the handle shares the backend; the backend is destroyed when the last handle, including
/// those held by in-flight work inside the backend, is dropped.
#[derive(Debug, Clone)]
pub struct Device {
	backend: Arc<dyn DeviceBackend>,
}

impl Device {
	pub fn new(backend: impl DeviceBackend + 'static) -> Self {
		Self {
			backend: Arc::new(backend),
		}
	}

	pub fn from_backend(backend: Arc<dyn DeviceBackend>) -> Self {
		Self { backend }
	}

	pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
		&self.backend
	}

	pub fn id(&self) -> &str {
		self.backend.id()
	}

	pub fn capabilities(&self) -> DeviceCapabilities {
		self.backend.capabilities()
	}

	pub fn host_allocator(&self) -> HostAllocator {
		self.backend.host_allocator()
	}

	pub fn allocator(&self) -> Arc<dyn Allocator> {
		self.backend.device_allocator()
	}

	pub fn replace_allocator(&self, new_allocator: Arc<dyn Allocator>) {
		tracing::debug!(
			device = self.id(),
			allocator = new_allocator.identifier(),
			"replacing device allocator"
		);
		self.backend.replace_device_allocator(new_allocator);
	}

	#[instrument(skip_all, fields(device = self.id()))]
	pub fn replace_channel_provider(&self, new_provider: Option<Arc<dyn ChannelProvider>>) {
		self.backend.replace_channel_provider(new_provider);
	}

	/// Releases pooled resources held by the backend.
	#[instrument(skip_all, fields(device = self.id()))]
	pub fn trim(&self) -> Result<(), Error> {
		self.backend.trim()
	}

	/// Queries an integer device property.
	///
	/// The [`DEVICE_ID_CATEGORY`] category is answered here without consulting the backend: the
	/// result is 1 if the device identifier matches `key` as a wildcard pattern and 0 otherwise.
	/// [`DEVICE_CAPABILITY_CATEGORY`] is likewise answered from [`Self::capabilities`].
	#[instrument(skip(self), level = "trace", fields(device = self.id()))]
	pub fn query_i64(&self, category: &str, key: &str) -> Result<i64, Error> {
		match category {
			DEVICE_ID_CATEGORY => Ok(match_pattern(self.id(), key) as i64),
			DEVICE_CAPABILITY_CATEGORY => query_capability(&self.capabilities(), key),
			_ => self.backend.query_i64(category, key),
		}
	}

	#[instrument(skip_all, fields(device = self.id()))]
	pub fn create_semaphore(&self, initial_value: u64) -> Result<Arc<Semaphore>, Error> {
		self.backend.create_semaphore(initial_value)
	}

	#[instrument(skip_all, fields(device = self.id()))]
	pub fn profiling_begin(&self, options: &ProfilingOptions) -> Result<(), Error> {
		options.validate()?;
		self.backend.profiling_begin(options)
	}

	#[instrument(skip_all, fields(device = self.id()))]
	pub fn profiling_end(&self) -> Result<(), Error> {
		self.backend.profiling_end()
	}
}

impl<B: DeviceBackend + 'static> From<Arc<B>> for Device {
	fn from(backend: Arc<B>) -> Self {
		Self { backend }
	}
}

fn query_capability(capabilities: &DeviceCapabilities, key: &str) -> Result<i64, Error> {
	match key {
		"queue_count" => Ok(capabilities.queue_count as i64),
		"inline_execution" => Ok(capabilities.inline_execution as i64),
		"narrow_tile_adjustment" => Ok(capabilities.narrow_tile_adjustment as i64),
		_ => Err(Error::NotFound(format!(
			"unknown key '{key}' in category '{DEVICE_CAPABILITY_CATEGORY}'"
		))),
	}
}

/// Matches `value` against a wildcard `pattern` where `*` matches any run of characters
/// (including none) and `?` matches exactly one.
pub fn match_pattern(value: &str, pattern: &str) -> bool {
	let value = value.chars().collect::<Vec<_>>();
	let pattern = pattern.chars().collect::<Vec<_>>();

	let (mut v, mut p) = (0, 0);
	// Position after the last `*` seen and the value index it was tried against.
	let mut backtrack = None;
	while v < value.len() {
		match pattern.get(p) {
			Some('*') => {
				backtrack = Some((p + 1, v));
				p += 1;
			}
			Some(&c) if c == '?' || c == value[v] => {
				p += 1;
				v += 1;
			}
			_ => match backtrack {
				Some((star_p, star_v)) => {
					p = star_p;
					v = star_v + 1;
					backtrack = Some((star_p, star_v + 1));
				}
				None => return false,
			},
		}
	}
	pattern[p..].iter().all(|&c| c == '*')
}
