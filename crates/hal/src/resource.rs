// Copyright 2025 Irreducible Inc.

//! Shared ownership of HAL resources.
//!
//! Devices, buffers, semaphores and command buffers are handed around as [`Arc`]s. A caller may
//! drop its handle immediately after a submission; the backend keeps its own strong references in
//! a [`ResourceSet`] until the submission retires, so destruction is deferred until every holder,
//! including in-flight work, has released.

use std::{
	any::Any,
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

/// Process-unique identity of a HAL resource, used for logging and resource tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
	pub fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A resource that can be retained by in-flight work.
pub trait Resource: Any + Send + Sync {
	fn resource_id(&self) -> ResourceId;
}

/// Strong references retained on behalf of one submission.
///
/// Inserting the same resource twice keeps a single reference.
#[derive(Default)]
pub struct ResourceSet {
	resources: HashMap<ResourceId, Arc<dyn Any + Send + Sync>>,
}

impl ResourceSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert<R: Resource>(&mut self, resource: &Arc<R>) {
		self.resources
			.entry(resource.resource_id())
			.or_insert_with(|| Arc::clone(resource) as Arc<dyn Any + Send + Sync>);
	}

	pub fn extend<'a, R: Resource>(&mut self, resources: impl IntoIterator<Item = &'a Arc<R>>) {
		for resource in resources {
			self.insert(resource);
		}
	}

	pub fn contains(&self, id: ResourceId) -> bool {
		self.resources.contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}

	/// Drops every retained reference.
	pub fn release(&mut self) {
		self.resources.clear();
	}
}

impl fmt::Debug for ResourceSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut ids = self.resources.keys().copied().collect::<Vec<_>>();
		ids.sort();
		f.debug_struct("ResourceSet").field("resources", &ids).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Dummy(ResourceId);

	impl Resource for Dummy {
		fn resource_id(&self) -> ResourceId {
			self.0
		}
	}

	#[test]
	fn test_ids_are_unique() {
		let a = ResourceId::next();
		let b = ResourceId::next();
		assert_ne!(a, b);
		assert!(b > a);
	}

	#[test]
	fn test_set_defers_destruction() {
		let resource = Arc::new(Dummy(ResourceId::next()));
		let weak = Arc::downgrade(&resource);

		let mut set = ResourceSet::new();
		set.insert(&resource);
		set.insert(&resource);
		assert_eq!(set.len(), 1);
		assert!(set.contains(resource.resource_id()));

		drop(resource);
		assert!(weak.upgrade().is_some());

		set.release();
		assert!(set.is_empty());
		assert!(weak.upgrade().is_none());
	}
}
