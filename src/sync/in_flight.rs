//! Mutual-exclusion markers for work that must not run twice at once.
//!
//! A key is held by exactly one task. A second attempt to claim a held key is refused, not
//! queued; the returned guard releases the key when dropped, on every exit path.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Block being ingested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
	pub channel: String,
	pub number: u64,
}

/// Channel being backfilled by a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackfillKey {
	pub client: String,
	pub channel: String,
}

/// Set of keys currently claimed, owned by one engine instance.
#[derive(Debug)]
pub struct InFlightSet<K: Eq + Hash> {
	keys: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> Clone for InFlightSet<K> {
	fn clone(&self) -> Self {
		Self {
			keys: self.keys.clone(),
		}
	}
}

impl<K: Eq + Hash> Default for InFlightSet<K> {
	fn default() -> Self {
		Self {
			keys: Arc::new(Mutex::new(HashSet::new())),
		}
	}
}

impl<K: Eq + Hash + Clone> InFlightSet<K> {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashSet<K>> {
		// The set stays consistent across a panic; every operation is a single insert or remove.
		self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Claim `key`, or `None` if another task holds it.
	pub fn try_claim(&self, key: K) -> Option<InFlightGuard<K>> {
		if self.lock().insert(key.clone()) {
			Some(InFlightGuard {
				set: self.clone(),
				key: Some(key),
			})
		} else {
			None
		}
	}

	#[cfg(test)]
	pub fn contains(&self, key: &K) -> bool {
		self.lock().contains(key)
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}

/// Claim on one key; dropping it releases the key.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash> {
	set: InFlightSet<K>,
	key: Option<K>,
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
	fn drop(&mut self) {
		if let Some(key) = self.key.take() {
			let mut keys = self
				.set
				.keys
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner());
			keys.remove(&key);
		}
	}
}
