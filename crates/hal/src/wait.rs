// Copyright 2025 Irreducible Inc.

use tracing::instrument;

use crate::{
	device::Device,
	semaphore::{Semaphore, SemaphoreCompatibility, SemaphoreList, WaitMode},
	timeout::Timeout,
	Error,
};

impl Device {
	/// Blocks until the wait condition over `semaphores` holds or `timeout` elapses.
	///
	/// An empty list is satisfied immediately, for every mode and timeout, without involving the
	/// backend. A timed-out wait returns [`Error::DeadlineExceeded`] and leaves in-flight work
	/// running.
	pub fn wait_semaphores(
		&self,
		wait_mode: WaitMode,
		semaphores: SemaphoreList<'_>,
		timeout: Timeout,
	) -> Result<(), Error> {
		semaphores.validate("wait")?;
		if semaphores.is_empty() {
			return Ok(());
		}
		self.wait_semaphores_on_backend(wait_mode, semaphores, timeout)
	}

	#[instrument(skip_all, fields(device = self.id(), mode = ?wait_mode, count = semaphores.len()))]
	fn wait_semaphores_on_backend(
		&self,
		wait_mode: WaitMode,
		semaphores: SemaphoreList<'_>,
		timeout: Timeout,
	) -> Result<(), Error> {
		self.backend()
			.wait_semaphores(wait_mode, semaphores, timeout)
	}

	/// How this device can wait on and signal `semaphore`, so callers can decide whether it must be
	/// proxied before being shared with this device.
	#[instrument(skip_all, fields(device = self.id()))]
	pub fn query_semaphore_compatibility(&self, semaphore: &Semaphore) -> SemaphoreCompatibility {
		self.backend().query_semaphore_compatibility(semaphore)
	}
}
