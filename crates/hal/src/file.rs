// Copyright 2025 Irreducible Inc.

use std::{
	fmt::Debug,
	io::{Read, Seek, SeekFrom, Write},
	path::Path,
	sync::{Mutex, RwLock},
};

use auto_impl::auto_impl;
use bitflags::bitflags;

use crate::{error::invalid_argument, Error};

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct FileAccess: u32 {
		const READ = 1 << 0;
		const WRITE = 1 << 1;
	}
}

/// A random-access byte store that queue reads and writes move data through.
#[auto_impl(&, Arc, Box)]
pub trait File: Debug + Send + Sync {
	fn access(&self) -> FileAccess;

	/// Current length in bytes.
	fn length(&self) -> u64;

	/// Fills `buffer` from `offset`. Fails if the range extends past the end.
	fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<(), Error>;

	/// Writes `data` at `offset`, growing the file if needed.
	fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), Error>;
}

/// Checks that `file` allows `access` and, for reads, that the range fits.
pub fn validate_file_range(
	file: &dyn File,
	access: FileAccess,
	offset: u64,
	length: u64,
) -> Result<(), Error> {
	if !file.access().contains(access) {
		return Err(Error::PermissionDenied(format!(
			"file opened with {:?} does not allow {:?}",
			file.access(),
			access
		)));
	}
	let Some(end) = offset.checked_add(length) else {
		invalid_argument!("file range at {offset} of length {length} overflows");
	};
	if access.contains(FileAccess::READ) && end > file.length() {
		return Err(Error::OutOfRange(format!(
			"file range [{offset}, {end}) exceeds file length {}",
			file.length()
		)));
	}
	Ok(())
}

/// A file backed by host memory.
#[derive(Debug)]
pub struct MemoryFile {
	access: FileAccess,
	contents: RwLock<Vec<u8>>,
}

impl MemoryFile {
	pub fn new(access: FileAccess, contents: Vec<u8>) -> Self {
		Self {
			access,
			contents: RwLock::new(contents),
		}
	}

	pub fn contents(&self) -> Vec<u8> {
		self.contents
			.read()
			.expect("lock is always available")
			.clone()
	}
}

impl File for MemoryFile {
	fn access(&self) -> FileAccess {
		self.access
	}

	fn length(&self) -> u64 {
		self.contents.read().expect("lock is always available").len() as u64
	}

	fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<(), Error> {
		let contents = self.contents.read().expect("lock is always available");
		let start = usize::try_from(offset).map_err(|_| {
			Error::OutOfRange(format!("file offset {offset} is not addressable"))
		})?;
		let source = start
			.checked_add(buffer.len())
			.and_then(|end| contents.get(start..end))
			.ok_or_else(|| {
				Error::OutOfRange(format!(
					"read of {} bytes at {offset} exceeds file length {}",
					buffer.len(),
					contents.len()
				))
			})?;
		buffer.copy_from_slice(source);
		Ok(())
	}

	fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
		let mut contents = self.contents.write().expect("lock is always available");
		let start = usize::try_from(offset).map_err(|_| {
			Error::OutOfRange(format!("file offset {offset} is not addressable"))
		})?;
		let end = start.checked_add(data.len()).ok_or_else(|| {
			Error::OutOfRange(format!("write of {} bytes at {offset} overflows", data.len()))
		})?;
		let len = contents.len();
		if len < end {
			contents.try_reserve(end - len).map_err(|err| {
				Error::ResourceExhausted(format!("cannot grow file to {end} bytes: {err}"))
			})?;
			contents.resize(end, 0);
		}
		contents[start..end].copy_from_slice(data);
		Ok(())
	}
}

/// A file on the host filesystem.
#[derive(Debug)]
pub struct HostFile {
	access: FileAccess,
	file: Mutex<std::fs::File>,
}

impl HostFile {
	pub fn open(path: impl AsRef<Path>, access: FileAccess) -> Result<Self, Error> {
		let file = std::fs::OpenOptions::new()
			.read(access.contains(FileAccess::READ))
			.write(access.contains(FileAccess::WRITE))
			.create(access.contains(FileAccess::WRITE))
			.truncate(false)
			.open(path)?;
		Ok(Self::from_std(file, access))
	}

	pub fn from_std(file: std::fs::File, access: FileAccess) -> Self {
		Self {
			access,
			file: Mutex::new(file),
		}
	}
}

impl File for HostFile {
	fn access(&self) -> FileAccess {
		self.access
	}

	fn length(&self) -> u64 {
		self.file
			.lock()
			.expect("mutex is always available")
			.metadata()
			.map_or(0, |metadata| metadata.len())
	}

	fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<(), Error> {
		let mut file = self.file.lock().expect("mutex is always available");
		file.seek(SeekFrom::Start(offset))?;
		file.read_exact(buffer)?;
		Ok(())
	}

	fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
		let mut file = self.file.lock().expect("mutex is always available");
		file.seek(SeekFrom::Start(offset))?;
		file.write_all(data)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_memory_file_read_write() {
		let file = MemoryFile::new(FileAccess::READ | FileAccess::WRITE, vec![1, 2, 3, 4]);
		let mut buffer = [0u8; 2];
		file.read_at(1, &mut buffer).unwrap();
		assert_eq!(buffer, [2, 3]);

		file.write_at(6, &[9]).unwrap();
		assert_eq!(file.contents(), vec![1, 2, 3, 4, 0, 0, 9]);
		assert_matches!(file.read_at(6, &mut buffer), Err(Error::OutOfRange(_)));
	}

	#[test]
	fn test_memory_file_rejects_unaddressable_growth() {
		let file = MemoryFile::new(FileAccess::WRITE, vec![1, 2]);
		assert_matches!(
			file.write_at(1 << 62, &[1]),
			Err(Error::OutOfRange(_)) | Err(Error::ResourceExhausted(_))
		);
		assert_matches!(
			file.write_at(u64::MAX, &[1]),
			Err(Error::OutOfRange(_)) | Err(Error::ResourceExhausted(_))
		);
		assert_eq!(file.contents(), vec![1, 2]);
	}

	#[test]
	fn test_validate_file_range() {
		let file = MemoryFile::new(FileAccess::READ, vec![0; 8]);
		assert!(validate_file_range(&file, FileAccess::READ, 0, 8).is_ok());
		assert_matches!(
			validate_file_range(&file, FileAccess::READ, 4, 8),
			Err(Error::OutOfRange(_))
		);
		assert_matches!(
			validate_file_range(&file, FileAccess::WRITE, 0, 1),
			Err(Error::PermissionDenied(_))
		);
	}

	#[test]
	fn test_host_file_round_trip() {
		let path = std::env::temp_dir().join(format!("gantry-host-file-{}", std::process::id()));
		let file = HostFile::open(&path, FileAccess::READ | FileAccess::WRITE).unwrap();
		file.write_at(4, b"gantry").unwrap();
		assert_eq!(file.length(), 10);

		let mut buffer = [0u8; 6];
		file.read_at(4, &mut buffer).unwrap();
		assert_eq!(&buffer, b"gantry");

		drop(file);
		std::fs::remove_file(path).unwrap();
	}
}
