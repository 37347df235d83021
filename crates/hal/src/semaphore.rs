// Copyright 2025 Irreducible Inc.

use std::{
	fmt,
	sync::{Arc, Condvar, Mutex},
	time::Duration,
};

use bitflags::bitflags;
use itertools::Itertools;

use crate::{
	error::{ensure_argument, invalid_argument},
	resource::{Resource, ResourceId},
	timeout::Timeout,
	Error,
};

/// Upper bound on a single blocking slice when waiting on semaphores that report to different
/// notifiers. A change on any notifier other than the one being slept on is observed at most this
/// late.
pub const MIXED_NOTIFIER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Wakes threads blocked on semaphore state changes.
///
/// Every semaphore reports to one notifier. Devices share a notifier between all semaphores they
/// create so that a single wait can observe all of them.
#[derive(Debug, Default)]
pub struct Notifier {
	epoch: Mutex<u64>,
	changed: Condvar,
}

impl Notifier {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Current change counter. Read it before checking a condition, then pass it to
	/// [`Self::wait_for_change`] so a change between the check and the wait is not missed.
	pub fn epoch(&self) -> u64 {
		*self.epoch.lock().expect("mutex is always available")
	}

	pub fn notify(&self) {
		let mut epoch = self.epoch.lock().expect("mutex is always available");
		*epoch = epoch.wrapping_add(1);
		self.changed.notify_all();
	}

	/// Blocks until the epoch differs from `seen` or until `limit` elapses.
	///
	/// Returns `true` if a change was observed.
	pub fn wait_for_change(&self, seen: u64, limit: Option<Duration>) -> bool {
		let epoch = self.epoch.lock().expect("mutex is always available");
		match limit {
			Some(limit) => {
				let (epoch, _) = self
					.changed
					.wait_timeout_while(epoch, limit, |epoch| *epoch == seen)
					.expect("mutex is always available");
				*epoch != seen
			}
			None => {
				let _epoch = self
					.changed
					.wait_while(epoch, |epoch| *epoch == seen)
					.expect("mutex is always available");
				true
			}
		}
	}
}

#[derive(Debug)]
struct SemaphoreState {
	value: u64,
	failure: Option<String>,
}

/// A timeline semaphore: a monotonically increasing 64-bit payload.
pub struct Semaphore {
	id: ResourceId,
	state: Mutex<SemaphoreState>,
	notifier: Arc<Notifier>,
}

impl Semaphore {
	/// Creates a semaphore with its own notifier.
	pub fn new(initial_value: u64) -> Arc<Self> {
		Self::with_notifier(initial_value, Notifier::new())
	}

	pub fn with_notifier(initial_value: u64, notifier: Arc<Notifier>) -> Arc<Self> {
		Arc::new(Self {
			id: ResourceId::next(),
			state: Mutex::new(SemaphoreState {
				value: initial_value,
				failure: None,
			}),
			notifier,
		})
	}

	pub fn id(&self) -> ResourceId {
		self.id
	}

	pub fn notifier(&self) -> &Arc<Notifier> {
		&self.notifier
	}

	/// Current payload, or the failure the semaphore was put into.
	pub fn query(&self) -> Result<u64, Error> {
		let state = self.state.lock().expect("mutex is always available");
		match &state.failure {
			Some(message) => Err(Error::SemaphoreFailed(message.clone())),
			None => Ok(state.value),
		}
	}

	/// Advances the payload to `value`, which must be greater than the current one.
	pub fn signal(&self, value: u64) -> Result<(), Error> {
		{
			let mut state = self.state.lock().expect("mutex is always available");
			if let Some(message) = &state.failure {
				return Err(Error::SemaphoreFailed(message.clone()));
			}
			ensure_argument!(
				value > state.value,
				"semaphore {} payload must increase monotonically: current {}, requested {}",
				self.id,
				state.value,
				value
			);
			state.value = value;
		}
		tracing::trace!(semaphore = %self.id, value, "semaphore signaled");
		self.notifier.notify();
		Ok(())
	}

	/// Puts the semaphore into a permanent failure state. The first failure wins.
	pub fn fail(&self, message: impl Into<String>) {
		{
			let mut state = self.state.lock().expect("mutex is always available");
			if state.failure.is_some() {
				return;
			}
			let message = message.into();
			tracing::debug!(semaphore = %self.id, %message, "semaphore failed");
			state.failure = Some(message);
		}
		self.notifier.notify();
	}

	/// Whether the payload has reached `value`. Fails if the semaphore has failed.
	pub fn has_reached(&self, value: u64) -> Result<bool, Error> {
		Ok(self.query()? >= value)
	}

	/// Blocks the calling thread until the payload reaches `value`.
	pub fn wait(self: &Arc<Self>, value: u64, timeout: Timeout) -> Result<(), Error> {
		let semaphores = [Arc::clone(self)];
		SemaphoreList::new(&semaphores, &[value]).wait_on_host(WaitMode::All, timeout)
	}
}

impl Resource for Semaphore {
	fn resource_id(&self) -> ResourceId {
		self.id
	}
}

impl fmt::Debug for Semaphore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock().expect("mutex is always available");
		f.debug_struct("Semaphore")
			.field("id", &self.id)
			.field("value", &state.value)
			.field("failure", &state.failure)
			.finish()
	}
}

/// Whether a wait is satisfied by every timepoint or by any one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
	#[default]
	All,
	Any,
}

bitflags! {
	/// How a device can interact with a semaphore.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct SemaphoreCompatibility: u32 {
		const HOST_WAIT = 1 << 0;
		const DEVICE_WAIT = 1 << 1;
		const HOST_SIGNAL = 1 << 2;
		const DEVICE_SIGNAL = 1 << 3;

		const NONE = 0;
		const HOST_ONLY = Self::HOST_WAIT.bits() | Self::HOST_SIGNAL.bits();
		const DEVICE_ONLY = Self::DEVICE_WAIT.bits() | Self::DEVICE_SIGNAL.bits();
		const ALL = Self::HOST_ONLY.bits() | Self::DEVICE_ONLY.bits();
	}
}

/// An ordered list of `(semaphore, payload)` timepoints, as two parallel slices.
///
/// The slices must have equal length; [`Self::validate`] rejects lists where they do not. An empty
/// list means no synchronization is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemaphoreList<'a> {
	semaphores: &'a [Arc<Semaphore>],
	payload_values: &'a [u64],
}

/// An owned copy of a validated [`SemaphoreList`], retained by backends across asynchronous work.
pub type Timepoints = Vec<(Arc<Semaphore>, u64)>;

impl<'a> SemaphoreList<'a> {
	pub const fn empty() -> Self {
		Self {
			semaphores: &[],
			payload_values: &[],
		}
	}

	/// Wraps the slices without checking them.
	pub const fn new(semaphores: &'a [Arc<Semaphore>], payload_values: &'a [u64]) -> Self {
		Self {
			semaphores,
			payload_values,
		}
	}

	/// Number of timepoints. For malformed lists this is the longer of the two slices.
	pub fn len(&self) -> usize {
		self.semaphores.len().max(self.payload_values.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn semaphores(&self) -> &'a [Arc<Semaphore>] {
		self.semaphores
	}

	pub fn payload_values(&self) -> &'a [u64] {
		self.payload_values
	}

	/// Checks that every semaphore has exactly one payload.
	pub fn validate(&self, name: &str) -> Result<(), Error> {
		if self.semaphores.len() != self.payload_values.len() {
			invalid_argument!(
				"{name} semaphore list is malformed: {} semaphores but {} payload values",
				self.semaphores.len(),
				self.payload_values.len()
			);
		}
		Ok(())
	}

	pub fn iter(&self) -> impl Iterator<Item = (&'a Arc<Semaphore>, u64)> + 'a {
		let (semaphores, payload_values) = (self.semaphores, self.payload_values);
		semaphores.iter().zip(payload_values.iter().copied())
	}

	pub fn to_timepoints(&self) -> Timepoints {
		self.iter()
			.map(|(semaphore, value)| (Arc::clone(semaphore), value))
			.collect()
	}

	/// Evaluates the wait condition without blocking.
	pub fn is_satisfied(&self, mode: WaitMode) -> Result<bool, Error> {
		timepoints_satisfied(self.iter(), mode)
	}

	/// Signals every timepoint from the host.
	pub fn signal_on_host(&self) -> Result<(), Error> {
		self.iter()
			.try_for_each(|(semaphore, value)| semaphore.signal(value))
	}

	/// Fails every semaphore in the list with the same message.
	pub fn fail_all(&self, message: &str) {
		for semaphore in self.semaphores {
			semaphore.fail(message);
		}
	}

	/// Blocks the calling thread until the wait condition holds or `timeout` elapses.
	///
	/// Any failed semaphore in the list fails the wait. Semaphores reporting to a single notifier
	/// are waited on without polling; mixed lists poll at [`MIXED_NOTIFIER_POLL_INTERVAL`].
	pub fn wait_on_host(&self, mode: WaitMode, timeout: Timeout) -> Result<(), Error> {
		self.validate("wait")?;
		let Some(first) = self.semaphores.first() else {
			return Ok(());
		};
		let notifier = first.notifier();
		let shared_notifier = self
			.semaphores
			.iter()
			.map(|semaphore| Arc::as_ptr(semaphore.notifier()))
			.all_equal();
		let deadline = timeout.deadline();

		loop {
			let epoch = notifier.epoch();
			if self.is_satisfied(mode)? {
				return Ok(());
			}
			let remaining = match deadline {
				Some(deadline) => {
					let now = std::time::Instant::now();
					if now >= deadline {
						return Err(Error::DeadlineExceeded);
					}
					Some(deadline - now)
				}
				None => None,
			};
			let limit = if shared_notifier {
				remaining
			} else {
				Some(remaining.map_or(MIXED_NOTIFIER_POLL_INTERVAL, |remaining| {
					remaining.min(MIXED_NOTIFIER_POLL_INTERVAL)
				}))
			};
			notifier.wait_for_change(epoch, limit);
		}
	}
}

/// Signals every timepoint after completed work, continuing past timepoints that reject the value.
///
/// The work has already taken effect, so a rejected signal is logged rather than returned.
pub fn publish_signals<'a>(timepoints: impl IntoIterator<Item = (&'a Arc<Semaphore>, u64)>) {
	for (semaphore, value) in timepoints {
		if let Err(err) = semaphore.signal(value) {
			tracing::warn!(semaphore = %semaphore.id(), value, %err, "failed to signal semaphore");
		}
	}
}

/// Evaluates a wait condition over owned or borrowed timepoints.
pub fn timepoints_satisfied<'a>(
	timepoints: impl IntoIterator<Item = (&'a Arc<Semaphore>, u64)>,
	mode: WaitMode,
) -> Result<bool, Error> {
	let mut any = false;
	let mut all = true;
	for (semaphore, value) in timepoints {
		if semaphore.has_reached(value)? {
			any = true;
		} else {
			all = false;
		}
	}
	Ok(match mode {
		WaitMode::All => all,
		WaitMode::Any => any,
	})
}
