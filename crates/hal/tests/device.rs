// Copyright 2025 Irreducible Inc.

use std::sync::Arc;

use assert_matches::assert_matches;
use gantry_hal::{
	profiling::{ProfilingMode, ProfilingOptions},
	transfer::TransferDirection,
	Allocator, AllocatorPool, Buffer, BufferParams, CommandBuffer, CommandBufferMode, Device,
	DeviceSize, Error, File, FileAccess, MemoryFile, QueueAffinity, Semaphore, SemaphoreList,
	StatusKind, Timeout, TransferBuffer, TransferBufferFlags, WaitMode,
};
use gantry_hal_test_utils::recording::{BackendCall, RecordingBackend};
use proptest::prelude::*;

fn recording_device() -> (Arc<RecordingBackend>, Device) {
	let backend = RecordingBackend::new("recording-0");
	let device = Device::from(Arc::clone(&backend));
	(backend, device)
}

fn allocate(device: &Device, size: DeviceSize) -> Arc<Buffer> {
	device
		.allocator()
		.allocate_buffer(&BufferParams::default(), size)
		.unwrap()
}

fn fill_command_buffer(mode: CommandBufferMode, buffer: &Arc<Buffer>) -> Arc<CommandBuffer> {
	let mut builder = CommandBuffer::builder(mode, QueueAffinity::ANY);
	builder.fill_buffer(buffer, 0, 4, &[1]).unwrap();
	builder.finish()
}

#[test]
fn test_zero_length_transfer_skips_backend() {
	let (backend, device) = recording_device();
	let mut target = [0u8; 4];
	let result = device.transfer(
		TransferBuffer::host(&[1, 2, 3, 4]),
		0,
		TransferBuffer::host_mut(&mut target),
		0,
		0,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert!(result.is_ok());
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_host_to_host_transfer_is_rejected() {
	let (backend, device) = recording_device();
	let mut target = [0u8; 4];
	let result = device.transfer(
		TransferBuffer::host(&[1, 2, 3, 4]),
		0,
		TransferBuffer::host_mut(&mut target),
		0,
		4,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_read_only_host_target_is_rejected() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 16);
	let result = device.transfer(
		TransferBuffer::device(&buffer),
		0,
		TransferBuffer::host(&[0u8; 16]),
		0,
		16,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_overlapping_device_transfer_is_rejected() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 64);

	let result = device.transfer_d2d(
		&buffer,
		0,
		&buffer,
		8,
		16,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));

	// Views of one allocation overlap even through different handles.
	let low = buffer.subspan(0, 32).unwrap();
	let high = buffer.subspan(16, 32).unwrap();
	let result = device.transfer_d2d(
		&low,
		16,
		&high,
		0,
		8,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));
	assert_eq!(backend.call_count(), 0);

	device
		.transfer_d2d(&buffer, 0, &buffer, 32, 32, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap();
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::TransferRange {
			direction: TransferDirection::DeviceToDevice,
			source_offset: 0,
			target_offset: 32,
			length: 32,
		}]
	);
}

#[test]
fn test_out_of_bounds_device_transfer_is_out_of_range() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 64);
	let other = allocate(&device, 64);

	let same_allocation = device.transfer_d2d(
		&buffer,
		0,
		&buffer,
		48,
		32,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(same_allocation, Err(Error::OutOfRange(_)));

	let across_allocations = device.transfer_d2d(
		&buffer,
		0,
		&other,
		48,
		32,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(across_allocations, Err(Error::OutOfRange(_)));
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_transfer_directions_reach_backend() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 8);
	let mut host = [0u8; 8];
	device
		.transfer_h2d(&[1; 8], &buffer, 0, 8, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap();
	device
		.transfer_d2h(&buffer, 0, &mut host, 8, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap();

	let directions = backend
		.calls()
		.into_iter()
		.map(|call| match call {
			BackendCall::TransferRange { direction, .. } => direction,
			other => panic!("unexpected call {other:?}"),
		})
		.collect::<Vec<_>>();
	assert_eq!(directions, [TransferDirection::HostToDevice, TransferDirection::DeviceToHost]);
}

#[test]
fn test_malformed_semaphore_lists_are_rejected() {
	let (backend, device) = recording_device();
	let semaphores = [Semaphore::new(0), Semaphore::new(0)];
	let malformed = SemaphoreList::new(&semaphores, &[1]);
	let buffer = allocate(&device, 16);
	let file: Arc<dyn File> = Arc::new(MemoryFile::new(FileAccess::READ, vec![0; 16]));

	assert_matches!(
		device.queue_execute(QueueAffinity::ANY, malformed, SemaphoreList::empty(), &[]),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.queue_barrier(QueueAffinity::ANY, SemaphoreList::empty(), malformed),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.queue_alloca(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			malformed,
			AllocatorPool::DEFAULT,
			&BufferParams::default(),
			16
		),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.queue_dealloca(QueueAffinity::ANY, malformed, SemaphoreList::empty(), &buffer),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.queue_read(
			QueueAffinity::ANY,
			malformed,
			SemaphoreList::empty(),
			&file,
			0,
			&buffer,
			0,
			16
		),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.queue_copy(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			SemaphoreList::new(&[], &[1]),
			&buffer,
			0,
			&allocate(&device, 16),
			0,
			16
		),
		Err(Error::InvalidArgument(_))
	);
	assert_matches!(
		device.wait_semaphores(WaitMode::All, malformed, Timeout::Immediate),
		Err(Error::InvalidArgument(_))
	);
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_inline_command_buffer_with_wait_is_rejected_whole() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 16);
	let wait = Semaphore::new(0);
	let deferred = fill_command_buffer(CommandBufferMode::ONE_SHOT, &buffer);
	let inline = fill_command_buffer(
		CommandBufferMode::ONE_SHOT | CommandBufferMode::ALLOW_INLINE_EXECUTION,
		&buffer,
	);

	let result = device.queue_execute(
		QueueAffinity::ANY,
		SemaphoreList::new(std::slice::from_ref(&wait), &[1]),
		SemaphoreList::empty(),
		&[deferred.clone(), inline.clone()],
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));
	assert_eq!(backend.call_count(), 0);

	// Without a wait the same batch is accepted.
	device
		.queue_execute(QueueAffinity::ANY, SemaphoreList::empty(), SemaphoreList::empty(), &[
			deferred, inline,
		])
		.unwrap();
	assert_eq!(backend.call_count(), 1);
}

#[test]
fn test_queue_copy_command_buffer_modes() {
	let (backend, device) = recording_device();
	let source = allocate(&device, 32);
	let target = allocate(&device, 32);
	let timeline = Semaphore::new(1);
	let chain = std::slice::from_ref(&timeline);

	device
		.queue_copy(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			SemaphoreList::new(chain, &[2]),
			&source,
			0,
			&target,
			0,
			32,
		)
		.unwrap();
	device
		.queue_copy(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[2]),
			SemaphoreList::new(chain, &[3]),
			&source,
			0,
			&target,
			0,
			32,
		)
		.unwrap();
	assert_eq!(timeline.query().unwrap(), 3);

	let calls = backend.calls();
	let modes = calls
		.iter()
		.map(|call| match call {
			BackendCall::QueueExecute {
				command_buffers, ..
			} => {
				assert_eq!(command_buffers.len(), 1);
				assert_eq!(command_buffers[0].command_count, 1);
				// The transient command buffer is gone once submission returns.
				assert!(command_buffers[0].handle.upgrade().is_none());
				command_buffers[0].mode
			}
			other => panic!("unexpected call {other:?}"),
		})
		.collect::<Vec<_>>();
	assert_eq!(modes, [
		CommandBufferMode::ONE_SHOT | CommandBufferMode::ALLOW_INLINE_EXECUTION,
		CommandBufferMode::ONE_SHOT,
	]);
}

#[test]
fn test_queue_copy_releases_command_buffer_on_backend_failure() {
	let (backend, device) = recording_device();
	let source = allocate(&device, 16);
	let target = allocate(&device, 16);
	backend.inject_failure(Error::ResourceExhausted("queue full".to_string()));

	let result = device.queue_copy(
		QueueAffinity::ANY,
		SemaphoreList::empty(),
		SemaphoreList::empty(),
		&source,
		0,
		&target,
		0,
		16,
	);
	assert_matches!(result, Err(Error::ResourceExhausted(message)) if message == "queue full");
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::QueueExecute { command_buffers, .. }]
			if command_buffers[0].handle.upgrade().is_none()
	);
}

#[test]
fn test_queue_copy_range_is_validated() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 16);
	let result = device.queue_copy(
		QueueAffinity::ANY,
		SemaphoreList::empty(),
		SemaphoreList::empty(),
		&buffer,
		0,
		&buffer,
		4,
		8,
	);
	assert_matches!(result, Err(Error::InvalidArgument(_)));
	assert_eq!(backend.call_count(), 0);
}

#[test]
fn test_barrier_is_empty_execute() {
	let (backend, device) = recording_device();
	let timeline = Semaphore::new(0);
	device
		.queue_barrier(
			QueueAffinity::queue(1),
			SemaphoreList::empty(),
			SemaphoreList::new(std::slice::from_ref(&timeline), &[1]),
		)
		.unwrap();
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::QueueExecute {
			queue_affinity,
			waits: 0,
			signals: 1,
			command_buffers,
		}] if command_buffers.is_empty() && *queue_affinity == QueueAffinity::queue(1)
	);
	assert_eq!(timeline.query().unwrap(), 1);
}

#[test]
fn test_empty_wait_skips_backend() {
	let (backend, device) = recording_device();
	for mode in [WaitMode::All, WaitMode::Any] {
		for timeout in [Timeout::Immediate, Timeout::Infinite] {
			device
				.wait_semaphores(mode, SemaphoreList::empty(), timeout)
				.unwrap();
		}
	}
	assert_eq!(backend.call_count(), 0);

	let semaphore = Semaphore::new(1);
	device
		.wait_semaphores(
			WaitMode::Any,
			SemaphoreList::new(std::slice::from_ref(&semaphore), &[1]),
			Timeout::Immediate,
		)
		.unwrap();
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::WaitSemaphores {
			mode: WaitMode::Any,
			count: 1
		}]
	);
}

#[test]
fn test_device_id_query_is_answered_locally() {
	let (backend, device) = recording_device();
	assert_eq!(device.query_i64("hal.device.id", "recording-*").unwrap(), 1);
	assert_eq!(device.query_i64("hal.device.id", "recording-?").unwrap(), 1);
	assert_eq!(device.query_i64("hal.device.id", "cpu").unwrap(), 0);
	assert_eq!(device.query_i64("hal.device.capability", "queue_count").unwrap(), 1);
	assert_eq!(backend.call_count(), 0);

	assert_matches!(device.query_i64("hal.executable.format", "vmvx"), Err(Error::NotFound(_)));
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::Query { category, key }] if category == "hal.executable.format" && key == "vmvx"
	);
}

#[test]
fn test_backend_errors_pass_through() {
	let (backend, device) = recording_device();
	let buffer = allocate(&device, 8);
	backend.inject_failure(Error::DeviceError(Box::new(std::io::Error::other("lost"))));

	let err = device
		.transfer_h2d(&[0; 8], &buffer, 0, 8, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap_err();
	assert_eq!(err.kind(), StatusKind::Internal);
	assert_eq!(err.to_string(), "device error: lost");
}

#[test]
fn test_profiling_options_are_validated() {
	let (backend, device) = recording_device();
	assert_matches!(
		device.profiling_begin(&ProfilingOptions::new(ProfilingMode::empty())),
		Err(Error::InvalidArgument(_))
	);
	assert_eq!(backend.call_count(), 0);

	device
		.profiling_begin(&ProfilingOptions::new(ProfilingMode::QUEUE_OPERATIONS))
		.unwrap();
	device.profiling_end().unwrap();
	assert_matches!(
		backend.calls().as_slice(),
		[BackendCall::ProfilingBegin, BackendCall::ProfilingEnd]
	);
}

#[test]
fn test_replace_allocator() {
	let (_backend, device) = recording_device();
	let replacement = Arc::new(gantry_hal::cpu::HeapAllocator::new("replacement"));
	device.replace_allocator(replacement.clone());
	assert_eq!(device.allocator().identifier(), "replacement");

	let _buffer = allocate(&device, 64);
	assert_eq!(replacement.statistics().bytes_live(), 64);
}

proptest! {
	#[test]
	fn test_device_copy_accepted_iff_disjoint(
		source_offset in 0u64..64,
		target_offset in 0u64..64,
		length in 1u64..64,
	) {
		prop_assume!(source_offset + length <= 64 && target_offset + length <= 64);
		let (backend, device) = recording_device();
		let buffer = allocate(&device, 64);

		let result = device.transfer_d2d(
			&buffer,
			source_offset,
			&buffer,
			target_offset,
			length,
			TransferBufferFlags::DEFAULT,
			Timeout::Infinite,
		);
		let disjoint =
			source_offset + length <= target_offset || target_offset + length <= source_offset;
		prop_assert_eq!(result.is_ok(), disjoint);
		prop_assert_eq!(backend.call_count(), disjoint as usize);
	}
}
