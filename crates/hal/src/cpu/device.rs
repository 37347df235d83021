// Copyright 2025 Irreducible Inc.

use std::sync::{Arc, Mutex, RwLock};

use tracing::instrument;

use super::{
	alloc::HeapAllocator,
	config::CpuDeviceConfig,
	executor::{execute_command_buffer, Executor, Submission, Work},
	memory,
};
use crate::{
	allocator::{Allocator, AllocatorPool, HostAllocator},
	buffer::{Buffer, BufferParams},
	channel::ChannelProvider,
	command_buffer::CommandBuffer,
	device::{Device, DeviceBackend, DeviceCapabilities},
	error::invalid_argument,
	file::{validate_file_range, File, FileAccess},
	profiling::{ProfilingMode, ProfilingOptions},
	queue::QueueAffinity,
	semaphore::{
		publish_signals, Notifier, Semaphore, SemaphoreCompatibility, SemaphoreList, WaitMode,
	},
	timeout::Timeout,
	transfer::{TransferBuffer, TransferBufferFlags},
	DeviceSize, Error,
};

/// A device executing on the host.
///
/// Transfers complete synchronously on the calling thread. Queue operations are handed to a single
/// executor thread which runs them as their waits become satisfied; command buffers that allow
/// inline execution run during submission instead. Every semaphore created by the device reports
/// to the device's notifier, so the executor wakes as soon as one of them changes.
#[derive(Debug)]
pub struct CpuDevice {
	config: CpuDeviceConfig,
	notifier: Arc<Notifier>,
	allocator: RwLock<Arc<dyn Allocator>>,
	channel_provider: RwLock<Option<Arc<dyn ChannelProvider>>>,
	profiling: Mutex<Option<ProfilingOptions>>,
	executor: Executor,
}

impl CpuDevice {
	pub fn new(config: CpuDeviceConfig) -> Result<Self, Error> {
		config.validate()?;
		let notifier = Notifier::new();
		let executor =
			Executor::spawn(&config.identifier, Arc::clone(&notifier), config.poll_interval)?;
		let allocator = Arc::new(HeapAllocator::new(format!("{}-heap", config.identifier)));
		tracing::debug!(device = %config.identifier, queue_count = config.queue_count, "created CPU device");
		Ok(Self {
			config,
			notifier,
			allocator: RwLock::new(allocator),
			channel_provider: RwLock::default(),
			profiling: Mutex::default(),
			executor,
		})
	}

	/// Creates a device handle configured from the environment.
	pub fn create_from_env() -> Result<Device, Error> {
		Ok(Device::new(Self::new(CpuDeviceConfig::from_env())?))
	}

	pub fn config(&self) -> &CpuDeviceConfig {
		&self.config
	}

	fn select_queue(&self, queue_affinity: QueueAffinity) -> Result<u32, Error> {
		match queue_affinity
			.restrict(self.config.queue_count)
			.first_queue()
		{
			Some(queue) => Ok(queue),
			None => invalid_argument!(
				"queue affinity {queue_affinity:?} selects none of the {} queues of device '{}'",
				self.config.queue_count,
				self.config.identifier
			),
		}
	}

	fn prepare(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		work: Work,
	) -> Result<Submission, Error> {
		let queue = self.select_queue(queue_affinity)?;
		Ok(Submission::new(
			queue,
			wait_semaphores.to_timepoints(),
			signal_semaphores.to_timepoints(),
			work,
		))
	}
}

impl DeviceBackend for CpuDevice {
	fn id(&self) -> &str {
		&self.config.identifier
	}

	fn capabilities(&self) -> DeviceCapabilities {
		DeviceCapabilities {
			queue_count: self.config.queue_count,
			inline_execution: true,
			narrow_tile_adjustment: self.config.narrow_tile_adjustment,
		}
	}

	fn host_allocator(&self) -> HostAllocator {
		HostAllocator::default()
	}

	fn device_allocator(&self) -> Arc<dyn Allocator> {
		Arc::clone(&self.allocator.read().expect("lock is always available"))
	}

	fn replace_device_allocator(&self, new_allocator: Arc<dyn Allocator>) {
		*self.allocator.write().expect("lock is always available") = new_allocator;
	}

	fn replace_channel_provider(&self, new_provider: Option<Arc<dyn ChannelProvider>>) {
		*self
			.channel_provider
			.write()
			.expect("lock is always available") = new_provider;
	}

	fn trim(&self) -> Result<(), Error> {
		self.device_allocator().trim()
	}

	fn query_i64(&self, category: &str, key: &str) -> Result<i64, Error> {
		match (category, key) {
			("hal.executor", "pending_submissions") => Ok(self.executor.pending_count() as i64),
			("hal.executor", "retired_submissions") => Ok(self.executor.retired_count() as i64),
			("hal.allocator", "bytes_live") => {
				Ok(self.device_allocator().statistics().bytes_live() as i64)
			}
			("hal.channel", "rank" | "count") => {
				let provider = self
					.channel_provider
					.read()
					.expect("lock is always available")
					.clone()
					.ok_or_else(|| {
						Error::FailedPrecondition(format!(
							"device '{}' has no channel provider",
							self.config.identifier
						))
					})?;
				let (rank, count) = provider.query_default_rank_and_count()?;
				let value = if key == "rank" { rank } else { count };
				Ok(value as i64)
			}
			_ => Err(Error::NotFound(format!("unknown query key '{category}::{key}'"))),
		}
	}

	fn create_semaphore(&self, initial_value: u64) -> Result<Arc<Semaphore>, Error> {
		Ok(Semaphore::with_notifier(initial_value, Arc::clone(&self.notifier)))
	}

	fn query_semaphore_compatibility(&self, semaphore: &Semaphore) -> SemaphoreCompatibility {
		if Arc::ptr_eq(semaphore.notifier(), &self.notifier) {
			SemaphoreCompatibility::ALL
		} else {
			// Foreign semaphores still work on queues, but only by polling.
			SemaphoreCompatibility::HOST_ONLY
		}
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
		match (source, target) {
			(TransferBuffer::Host(span), TransferBuffer::Device(buffer)) => {
				let range = memory::span_range(span.len(), source_offset, data_length)?;
				memory::write(buffer, target_offset, &span.as_slice()[range])
			}
			(TransferBuffer::Device(buffer), TransferBuffer::Host(mut span)) => {
				let range = memory::span_range(span.len(), target_offset, data_length)?;
				let Some(bytes) = span.as_mut_slice() else {
					invalid_argument!("host transfer target must be writable memory");
				};
				memory::read(buffer, source_offset, &mut bytes[range])
			}
			(TransferBuffer::Device(source), TransferBuffer::Device(target)) => {
				memory::copy(source, source_offset, target, target_offset, data_length)
			}
			(TransferBuffer::Host(_), TransferBuffer::Host(_)) => {
				invalid_argument!("host->host transfers are not supported")
			}
		}
	}

	fn queue_alloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		pool: AllocatorPool,
		params: &BufferParams,
		allocation_size: DeviceSize,
	) -> Result<Arc<Buffer>, Error> {
		if pool != AllocatorPool::DEFAULT {
			tracing::debug!(pool = pool.0, "CPU device services every pool from its allocator");
		}
		let mut submission =
			self.prepare(queue_affinity, wait_semaphores, signal_semaphores, Work::Barrier)?;
		let buffer = self
			.device_allocator()
			.allocate_buffer(params, allocation_size)?;
		submission.resources.insert(&buffer);
		self.executor.submit(submission);
		Ok(buffer)
	}

	fn queue_dealloca(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		buffer: &Arc<Buffer>,
	) -> Result<(), Error> {
		let mut submission =
			self.prepare(queue_affinity, wait_semaphores, signal_semaphores, Work::Barrier)?;
		submission.resources.insert(buffer);
		self.executor.submit(submission);
		Ok(())
	}

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
	) -> Result<(), Error> {
		validate_file_range(source_file.as_ref(), FileAccess::READ, source_offset, length)?;
		target_buffer.calculate_range(target_offset, length)?;
		let submission = self.prepare(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			Work::Read {
				file: Arc::clone(source_file),
				file_offset: source_offset,
				buffer: Arc::clone(target_buffer),
				buffer_offset: target_offset,
				length,
			},
		)?;
		self.executor.submit(submission);
		Ok(())
	}

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
	) -> Result<(), Error> {
		validate_file_range(target_file.as_ref(), FileAccess::WRITE, target_offset, length)?;
		source_buffer.calculate_range(source_offset, length)?;
		let submission = self.prepare(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			Work::Write {
				buffer: Arc::clone(source_buffer),
				buffer_offset: source_offset,
				file: Arc::clone(target_file),
				file_offset: target_offset,
				length,
			},
		)?;
		self.executor.submit(submission);
		Ok(())
	}

	fn queue_execute(
		&self,
		queue_affinity: QueueAffinity,
		wait_semaphores: SemaphoreList<'_>,
		signal_semaphores: SemaphoreList<'_>,
		command_buffers: &[Arc<CommandBuffer>],
	) -> Result<(), Error> {
		let queue = self.select_queue(queue_affinity)?;
		let inline = wait_semaphores.is_empty()
			&& !command_buffers.is_empty()
			&& command_buffers.iter().all(|cb| cb.allows_inline_execution());
		if inline {
			let _span = tracing::debug_span!("execute_inline", queue).entered();
			return match command_buffers
				.iter()
				.try_for_each(|command_buffer| execute_command_buffer(command_buffer))
			{
				Ok(()) => {
					publish_signals(signal_semaphores.iter());
					Ok(())
				}
				Err(err) => {
					signal_semaphores.fail_all(&err.to_string());
					Err(err)
				}
			};
		}

		let mut submission = self.prepare(
			queue_affinity,
			wait_semaphores,
			signal_semaphores,
			Work::Execute(command_buffers.to_vec()),
		)?;
		submission.resources.extend(command_buffers);
		for command_buffer in command_buffers {
			submission.resources.extend(command_buffer.buffers());
		}
		self.executor.submit(submission);
		Ok(())
	}

	fn queue_flush(&self, queue_affinity: QueueAffinity) -> Result<(), Error> {
		self.select_queue(queue_affinity)?;
		self.executor.flush();
		Ok(())
	}

	#[instrument(skip_all, level = "trace")]
	fn wait_semaphores(
		&self,
		wait_mode: WaitMode,
		semaphores: SemaphoreList<'_>,
		timeout: Timeout,
	) -> Result<(), Error> {
		semaphores.wait_on_host(wait_mode, timeout)
	}

	fn profiling_begin(&self, options: &ProfilingOptions) -> Result<(), Error> {
		let mut profiling = self.profiling.lock().expect("mutex is always available");
		if profiling.is_some() {
			return Err(Error::FailedPrecondition(
				"profiling is already active on this device".to_string(),
			));
		}
		if options.file_path.is_some() {
			tracing::warn!(device = %self.config.identifier, "CPU device does not write profiling captures");
		}
		self.executor
			.set_log_submissions(options.mode.contains(ProfilingMode::QUEUE_OPERATIONS));
		*profiling = Some(options.clone());
		Ok(())
	}

	fn profiling_end(&self) -> Result<(), Error> {
		let mut profiling = self.profiling.lock().expect("mutex is always available");
		if profiling.take().is_none() {
			return Err(Error::FailedPrecondition(
				"profiling is not active on this device".to_string(),
			));
		}
		self.executor.set_log_submissions(false);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use assert_matches::assert_matches;

	use super::*;
	use crate::channel::StaticChannelProvider;

	fn device() -> Device {
		Device::new(CpuDevice::new(CpuDeviceConfig::default()).unwrap())
	}

	#[test]
	fn test_capabilities_follow_config() {
		let config = CpuDeviceConfig {
			queue_count: 4,
			narrow_tile_adjustment: false,
			..Default::default()
		};
		let device = Device::new(CpuDevice::new(config).unwrap());
		assert_eq!(device.query_i64("hal.device.capability", "queue_count").unwrap(), 4);
		assert_eq!(
			device
				.query_i64("hal.device.capability", "narrow_tile_adjustment")
				.unwrap(),
			0
		);
		assert_eq!(device.query_i64("hal.device.id", "local-*").unwrap(), 1);
	}

	#[test]
	fn test_channel_queries() {
		let device = device();
		assert_matches!(device.query_i64("hal.channel", "rank"), Err(Error::FailedPrecondition(_)));
		device.replace_channel_provider(Some(Arc::new(StaticChannelProvider { rank: 2, count: 8 })));
		assert_eq!(device.query_i64("hal.channel", "rank").unwrap(), 2);
		assert_eq!(device.query_i64("hal.channel", "count").unwrap(), 8);
		assert_matches!(device.query_i64("hal.channel", "color"), Err(Error::NotFound(_)));
	}

	#[test]
	fn test_affinity_outside_queues_is_rejected() {
		let device = device();
		let result = device.queue_barrier(
			QueueAffinity::queue(3),
			SemaphoreList::empty(),
			SemaphoreList::empty(),
		);
		assert_matches!(result, Err(Error::InvalidArgument(_)));
	}

	#[test]
	fn test_semaphore_compatibility() {
		let device = device();
		let own = device.create_semaphore(0).unwrap();
		let foreign = Semaphore::new(0);
		assert_eq!(device.query_semaphore_compatibility(&own), SemaphoreCompatibility::ALL);
		assert_eq!(
			device.query_semaphore_compatibility(&foreign),
			SemaphoreCompatibility::HOST_ONLY
		);
	}

	#[test]
	fn test_profiling_session() {
		let device = device();
		let options = ProfilingOptions::new(ProfilingMode::QUEUE_OPERATIONS);
		assert_matches!(device.profiling_end(), Err(Error::FailedPrecondition(_)));
		device.profiling_begin(&options).unwrap();
		assert_matches!(device.profiling_begin(&options), Err(Error::FailedPrecondition(_)));
		device
			.queue_barrier(QueueAffinity::ANY, SemaphoreList::empty(), SemaphoreList::empty())
			.unwrap();
		device.profiling_end().unwrap();
	}

	#[test]
	fn test_inline_execution_completes_before_return() {
		let device = device();
		let buffer = device
			.allocator()
			.allocate_buffer(&BufferParams::default(), 8)
			.unwrap();
		let done = device.create_semaphore(0).unwrap();

		device
			.queue_fill(
				QueueAffinity::ANY,
				SemaphoreList::empty(),
				SemaphoreList::new(std::slice::from_ref(&done), &[1]),
				&buffer,
				0,
				8,
				&[0x5A],
			)
			.unwrap();
		assert_eq!(done.query().unwrap(), 1);

		let mut out = [0u8; 8];
		device
			.transfer_d2h(&buffer, 0, &mut out, 8, TransferBufferFlags::DEFAULT, Timeout::Infinite)
			.unwrap();
		assert_eq!(out, [0x5A; 8]);
	}

	#[test]
	fn test_host_span_bounds_are_checked() {
		let device = device();
		let buffer = device
			.allocator()
			.allocate_buffer(&BufferParams::default(), 16)
			.unwrap();
		let result = device.transfer_h2d(
			&[0u8; 4],
			&buffer,
			0,
			8,
			TransferBufferFlags::DEFAULT,
			Timeout::after(Duration::from_secs(1)),
		);
		assert_matches!(result, Err(Error::OutOfRange(_)));
	}
}
