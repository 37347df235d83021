// Copyright 2025 Irreducible Inc.

//! Behavioral tests shared by every backend that moves real data.

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use gantry_hal::{
	AllocatorPool, Buffer, BufferParams, Device, DeviceSize, Error, File, FileAccess, MemoryFile,
	QueueAffinity, Semaphore, SemaphoreList, Timeout, TransferBufferFlags, WaitMode,
};
use rand::{rngs::StdRng, RngCore, SeedableRng};

const WAIT: Duration = Duration::from_secs(10);

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
	let mut bytes = vec![0u8; len];
	rng.fill_bytes(&mut bytes);
	bytes
}

fn allocate(device: &Device, size: DeviceSize) -> Arc<Buffer> {
	device
		.allocator()
		.allocate_buffer(&BufferParams::default(), size)
		.unwrap()
}

fn download(device: &Device, buffer: &Arc<Buffer>, offset: DeviceSize, len: usize) -> Vec<u8> {
	let mut out = vec![0u8; len];
	device
		.transfer_d2h(
			buffer,
			offset,
			&mut out,
			len as DeviceSize,
			TransferBufferFlags::DEFAULT,
			Timeout::Infinite,
		)
		.unwrap();
	out
}

fn timepoint(semaphore: &Arc<Semaphore>) -> &[Arc<Semaphore>] {
	std::slice::from_ref(semaphore)
}

pub fn test_generic_transfer_round_trip(device: &Device, size: usize) {
	let mut rng = StdRng::seed_from_u64(0);
	let data = random_bytes(&mut rng, size);
	let a = allocate(device, size as DeviceSize * 2);
	let b = allocate(device, size as DeviceSize);

	device
		.transfer_h2d(
			&data,
			&a,
			size as DeviceSize,
			size as DeviceSize,
			TransferBufferFlags::DEFAULT,
			Timeout::after(WAIT),
		)
		.unwrap();
	device
		.transfer_d2d(
			&a,
			size as DeviceSize,
			&b,
			0,
			size as DeviceSize,
			TransferBufferFlags::DEFAULT,
			Timeout::after(WAIT),
		)
		.unwrap();

	assert_eq!(download(device, &b, 0, size), data);
	assert_eq!(download(device, &a, 0, size), vec![0u8; size]);
}

pub fn test_generic_subspan_transfer(device: &Device) {
	let buffer = allocate(device, 64);
	let view = buffer.subspan(16, 32).unwrap();
	device
		.transfer_h2d(&[7u8; 32], &view, 0, 32, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap();

	let whole = download(device, &buffer, 0, 64);
	assert_eq!(&whole[..16], &[0u8; 16]);
	assert_eq!(&whole[16..48], &[7u8; 32]);
	assert_eq!(&whole[48..], &[0u8; 16]);

	let result = device.transfer_h2d(
		&[0u8; 8],
		&view,
		28,
		8,
		TransferBufferFlags::DEFAULT,
		Timeout::Infinite,
	);
	assert_matches!(result, Err(Error::OutOfRange(_)));
}

/// Builds `fill -> update -> copy`, each step waiting on the previous, submitted in reverse order
/// and released by a single host signal.
pub fn test_generic_semaphore_chain(device: &Device) {
	let source = allocate(device, 16);
	let target = allocate(device, 16);
	let timeline = device.create_semaphore(0).unwrap();
	let chain = timepoint(&timeline);

	device
		.queue_copy(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[3]),
			SemaphoreList::new(chain, &[4]),
			&source,
			0,
			&target,
			0,
			16,
		)
		.unwrap();
	device
		.queue_update(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[2]),
			SemaphoreList::new(chain, &[3]),
			&[1, 2, 3, 4],
			&source,
			4,
		)
		.unwrap();
	device
		.queue_fill(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[1]),
			SemaphoreList::new(chain, &[2]),
			&source,
			0,
			16,
			&[0xEE, 0xFF],
		)
		.unwrap();

	assert_matches!(
		device.wait_semaphores(
			WaitMode::All,
			SemaphoreList::new(chain, &[4]),
			Timeout::Immediate
		),
		Err(Error::DeadlineExceeded)
	);
	timeline.signal(1).unwrap();
	device
		.wait_semaphores(WaitMode::All, SemaphoreList::new(chain, &[4]), Timeout::after(WAIT))
		.unwrap();

	let mut expected = [0xEE, 0xFF].repeat(8);
	expected[4..8].copy_from_slice(&[1, 2, 3, 4]);
	assert_eq!(download(device, &target, 0, 16), expected);
}

pub fn test_generic_wait_any(device: &Device) {
	let a = device.create_semaphore(0).unwrap();
	let b = device.create_semaphore(0).unwrap();
	let semaphores = [a, Arc::clone(&b)];
	let list = SemaphoreList::new(&semaphores, &[1, 1]);

	device
		.queue_barrier(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			SemaphoreList::new(timepoint(&b), &[1]),
		)
		.unwrap();
	device
		.wait_semaphores(WaitMode::Any, list, Timeout::after(WAIT))
		.unwrap();
	assert_matches!(
		device.wait_semaphores(WaitMode::All, list, Timeout::after(Duration::from_millis(5))),
		Err(Error::DeadlineExceeded)
	);
}

pub fn test_generic_file_round_trip(device: &Device, size: usize) {
	let mut rng = StdRng::seed_from_u64(1);
	let data = random_bytes(&mut rng, size);
	let source: Arc<dyn File> = Arc::new(MemoryFile::new(FileAccess::READ, data.clone()));
	let target = Arc::new(MemoryFile::new(FileAccess::WRITE, Vec::new()));
	let target_file: Arc<dyn File> = target.clone();
	let buffer = allocate(device, size as DeviceSize);
	let timeline = device.create_semaphore(0).unwrap();
	let chain = timepoint(&timeline);

	device
		.queue_read(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			SemaphoreList::new(chain, &[1]),
			&source,
			0,
			&buffer,
			0,
			size as DeviceSize,
		)
		.unwrap();
	device
		.queue_write(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[1]),
			SemaphoreList::new(chain, &[2]),
			&buffer,
			0,
			&target_file,
			8,
			size as DeviceSize,
		)
		.unwrap();
	device
		.wait_semaphores(WaitMode::All, SemaphoreList::new(chain, &[2]), Timeout::after(WAIT))
		.unwrap();

	let written = target.contents();
	assert_eq!(&written[..8], &[0u8; 8]);
	assert_eq!(&written[8..], &data[..]);

	// Files opened read-only cannot be written to.
	let result = device.queue_write(
		QueueAffinity::ANY,
		SemaphoreList::empty(),
		SemaphoreList::empty(),
		&buffer,
		0,
		&source,
		0,
		1,
	);
	assert_matches!(result, Err(Error::PermissionDenied(_)));
}

pub fn test_generic_queue_alloca_dealloca(device: &Device) {
	let timeline = device.create_semaphore(0).unwrap();
	let chain = timepoint(&timeline);

	let buffer = device
		.queue_alloca(
			QueueAffinity::ANY,
			SemaphoreList::empty(),
			SemaphoreList::new(chain, &[1]),
			AllocatorPool::DEFAULT,
			&BufferParams::default(),
			128,
		)
		.unwrap();
	assert_eq!(buffer.byte_length(), 128);
	timeline.wait(1, Timeout::after(WAIT)).unwrap();

	device
		.transfer_h2d(&[9u8; 128], &buffer, 0, 128, TransferBufferFlags::DEFAULT, Timeout::Infinite)
		.unwrap();
	assert_eq!(download(device, &buffer, 0, 128), vec![9u8; 128]);

	device
		.queue_dealloca(
			QueueAffinity::ANY,
			SemaphoreList::new(chain, &[1]),
			SemaphoreList::new(chain, &[2]),
			&buffer,
		)
		.unwrap();
	drop(buffer);
	timeline.wait(2, Timeout::after(WAIT)).unwrap();
}
