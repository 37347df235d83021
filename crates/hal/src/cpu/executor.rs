// Copyright 2025 Irreducible Inc.

//! A single worker thread that retires queued submissions once their waits are satisfied.

use std::{
	any::Any,
	collections::VecDeque,
	panic::{self, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex,
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use tracing::{debug, debug_span, error, warn};

use super::memory;
use crate::{
	buffer::Buffer,
	command_buffer::{CommandBuffer, TransferCommand},
	file::File,
	resource::{ResourceId, ResourceSet},
	semaphore::{publish_signals, timepoints_satisfied, Notifier, Timepoints, WaitMode},
	DeviceSize, Error,
};

/// What a submission does once it starts.
#[derive(Debug)]
pub(super) enum Work {
	Execute(Vec<Arc<CommandBuffer>>),
	/// Orders only; resources attached to the submission are released when it retires.
	Barrier,
	Read {
		file: Arc<dyn File>,
		file_offset: u64,
		buffer: Arc<Buffer>,
		buffer_offset: DeviceSize,
		length: DeviceSize,
	},
	Write {
		buffer: Arc<Buffer>,
		buffer_offset: DeviceSize,
		file: Arc<dyn File>,
		file_offset: u64,
		length: DeviceSize,
	},
}

impl Work {
	fn name(&self) -> &'static str {
		match self {
			Self::Execute(_) => "execute",
			Self::Barrier => "barrier",
			Self::Read { .. } => "read",
			Self::Write { .. } => "write",
		}
	}

	fn run(&self) -> Result<(), Error> {
		match self {
			Self::Execute(command_buffers) => command_buffers
				.iter()
				.try_for_each(|command_buffer| execute_command_buffer(command_buffer)),
			Self::Barrier => Ok(()),
			Self::Read {
				file,
				file_offset,
				buffer,
				buffer_offset,
				length,
			} => memory::with_bytes_mut(buffer, *buffer_offset, *length, |bytes| {
				file.read_at(*file_offset, bytes)
			})?,
			Self::Write {
				buffer,
				buffer_offset,
				file,
				file_offset,
				length,
			} => memory::with_bytes(buffer, *buffer_offset, *length, |bytes| {
				file.write_at(*file_offset, bytes)
			})?,
		}
	}
}

/// Runs every command of `command_buffer` in recording order.
pub(super) fn execute_command_buffer(command_buffer: &CommandBuffer) -> Result<(), Error> {
	for command in command_buffer.commands() {
		match command {
			TransferCommand::Fill {
				target_buffer,
				target_offset,
				length,
				pattern,
			} => memory::fill(target_buffer, *target_offset, *length, pattern)?,
			TransferCommand::Update {
				source,
				target_buffer,
				target_offset,
			} => memory::write(target_buffer, *target_offset, source)?,
			TransferCommand::Copy {
				source_buffer,
				source_offset,
				target_buffer,
				target_offset,
				length,
			} => memory::copy(source_buffer, *source_offset, target_buffer, *target_offset, *length)?,
		}
	}
	Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message
	} else {
		"unknown panic"
	}
}

/// A queued unit of work with its ordering constraints and retained resources.
#[derive(Debug)]
pub(super) struct Submission {
	pub id: ResourceId,
	pub queue: u32,
	pub waits: Timepoints,
	pub signals: Timepoints,
	pub work: Work,
	pub resources: ResourceSet,
}

impl Submission {
	pub fn new(queue: u32, waits: Timepoints, signals: Timepoints, work: Work) -> Self {
		Self {
			id: ResourceId::next(),
			queue,
			waits,
			signals,
			work,
			resources: ResourceSet::new(),
		}
	}

	/// Runs the work and publishes its outcome on the signal semaphores.
	pub fn retire(self) {
		let _span = debug_span!(
			"retire",
			submission = %self.id,
			queue = self.queue,
			work = self.work.name()
		)
		.entered();
		match panic::catch_unwind(AssertUnwindSafe(|| self.work.run())) {
			Ok(Ok(())) => {
				publish_signals(self.signals.iter().map(|(semaphore, value)| (semaphore, *value)))
			}
			Ok(Err(err)) => self.fail(&err.to_string()),
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				error!(submission = %self.id, message, "submission panicked");
				self.fail(&format!("submission panicked: {message}"));
			}
		}
	}

	/// Propagates a failure to the signal semaphores without running the work.
	pub fn fail(self, message: &str) {
		debug!(submission = %self.id, message, "submission failed");
		for (semaphore, _) in &self.signals {
			semaphore.fail(message);
		}
	}

	fn poll(&self) -> Result<bool, Error> {
		timepoints_satisfied(
			self.waits.iter().map(|(semaphore, value)| (semaphore, *value)),
			WaitMode::All,
		)
	}
}

#[derive(Debug)]
struct Shared {
	pending: Mutex<VecDeque<Submission>>,
	notifier: Arc<Notifier>,
	poll_interval: Duration,
	shutdown: AtomicBool,
	log_submissions: AtomicBool,
	retired: AtomicU64,
}

enum Next {
	Ready(Submission),
	Failed(Submission, Error),
	Idle { has_pending: bool },
}

impl Shared {
	/// Removes the oldest submission that can make progress.
	fn take_next(&self) -> Next {
		let mut pending = self.pending.lock().expect("mutex is always available");
		for index in 0..pending.len() {
			match pending[index].poll() {
				Ok(false) => continue,
				Ok(true) => {
					if let Some(submission) = pending.remove(index) {
						return Next::Ready(submission);
					}
				}
				Err(err) => {
					if let Some(submission) = pending.remove(index) {
						return Next::Failed(submission, err);
					}
				}
			}
		}
		Next::Idle {
			has_pending: !pending.is_empty(),
		}
	}

	fn run(&self) {
		loop {
			let epoch = self.notifier.epoch();
			match self.take_next() {
				Next::Ready(submission) => {
					submission.retire();
					self.retired.fetch_add(1, Ordering::Relaxed);
				}
				Next::Failed(submission, err) => {
					submission.fail(&err.to_string());
					self.retired.fetch_add(1, Ordering::Relaxed);
				}
				Next::Idle { has_pending } => {
					if self.shutdown.load(Ordering::Acquire) {
						self.abandon_pending();
						return;
					}
					// Waits on semaphores reporting to other notifiers are only seen by polling.
					let limit = has_pending.then_some(self.poll_interval);
					self.notifier.wait_for_change(epoch, limit);
				}
			}
		}
	}

	fn abandon_pending(&self) {
		let pending = std::mem::take(&mut *self.pending.lock().expect("mutex is always available"));
		if !pending.is_empty() {
			warn!(count = pending.len(), "device destroyed with unsatisfied submissions");
		}
		for submission in pending {
			submission.fail("device destroyed before the submission's waits were satisfied");
		}
	}
}

/// Owner of the worker thread. Dropping it drains runnable work and joins the thread.
#[derive(Debug)]
pub(super) struct Executor {
	shared: Arc<Shared>,
	thread: Option<JoinHandle<()>>,
}

impl Executor {
	pub fn spawn(name: &str, notifier: Arc<Notifier>, poll_interval: Duration) -> Result<Self, Error> {
		let shared = Arc::new(Shared {
			pending: Mutex::default(),
			notifier,
			poll_interval,
			shutdown: AtomicBool::new(false),
			log_submissions: AtomicBool::new(false),
			retired: AtomicU64::new(0),
		});
		let thread = thread::Builder::new()
			.name(format!("{name}-executor"))
			.spawn({
				let shared = Arc::clone(&shared);
				move || shared.run()
			})?;
		Ok(Self {
			shared,
			thread: Some(thread),
		})
	}

	pub fn submit(&self, submission: Submission) {
		if self.shared.log_submissions.load(Ordering::Relaxed) {
			tracing::info!(
				submission = %submission.id,
				queue = submission.queue,
				work = submission.work.name(),
				waits = submission.waits.len(),
				signals = submission.signals.len(),
				resources = submission.resources.len(),
				"queue submission"
			);
		}
		self.shared
			.pending
			.lock()
			.expect("mutex is always available")
			.push_back(submission);
		self.shared.notifier.notify();
	}

	pub fn flush(&self) {
		self.shared.notifier.notify();
	}

	pub fn pending_count(&self) -> usize {
		self.shared
			.pending
			.lock()
			.expect("mutex is always available")
			.len()
	}

	pub fn retired_count(&self) -> u64 {
		self.shared.retired.load(Ordering::Relaxed)
	}

	pub fn set_log_submissions(&self, enabled: bool) {
		self.shared.log_submissions.store(enabled, Ordering::Relaxed);
	}
}

impl Drop for Executor {
	fn drop(&mut self) {
		self.shared.shutdown.store(true, Ordering::Release);
		self.shared.notifier.notify();
		if let Some(thread) = self.thread.take() {
			if thread.join().is_err() {
				warn!("executor thread panicked");
			}
		}
	}
}
