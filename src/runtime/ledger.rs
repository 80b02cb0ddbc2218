use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use super::keysets::KeySetId;
use super::value::ContainerId;
use crate::ast::Key;

/// Invocation context that registered a dependency: its key set and key.
pub type Owner = (KeySetId, Key);
/// A tracked location: container identity and key inside it.
pub type Location = (ContainerId, Key);

/// Who reads which location, in both directions.
#[derive(Debug, Default)]
pub struct Ledger {
    readers: FxHashMap<ContainerId, FxHashMap<Key, IndexSet<Owner>>>,
    reads: FxHashMap<Owner, Vec<Location>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, owner: Owner, location: Location) {
        tracing::trace!(keys = owner.0, key = %owner.1, container = location.0, at = %location.1, "track");
        if self
            .readers
            .entry(location.0)
            .or_default()
            .entry(location.1.clone())
            .or_default()
            .insert(owner.clone())
        {
            self.reads.entry(owner).or_default().push(location);
        }
    }

    /// Drops every dependency registered by `owner`.
    pub fn untrack(&mut self, owner: &Owner) {
        let Some(locations) = self.reads.remove(owner) else {
            return;
        };
        for (container, key) in locations {
            let Some(keys) = self.readers.get_mut(&container) else {
                continue;
            };
            if let Some(readers) = keys.get_mut(&key) {
                readers.shift_remove(owner);
                if readers.is_empty() {
                    keys.remove(&key);
                }
            }
            if keys.is_empty() {
                self.readers.remove(&container);
            }
        }
    }

    pub fn readers(&self, location: &Location) -> Vec<Owner> {
        self.readers
            .get(&location.0)
            .and_then(|keys| keys.get(&location.1))
            .map(|readers| readers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-registers every reader of `from` on the same key of `to`.
    pub fn migrate(&mut self, from: ContainerId, to: ContainerId) {
        if from == to {
            return;
        }
        let Some(keys) = self.readers.remove(&from) else {
            return;
        };
        for (key, owners) in keys {
            for owner in &owners {
                if let Some(reads) = self.reads.get_mut(owner) {
                    for location in reads.iter_mut() {
                        if location.0 == from && location.1 == key {
                            location.0 = to;
                        }
                    }
                }
            }
            self.readers
                .entry(to)
                .or_default()
                .entry(key)
                .or_default()
                .extend(owners);
        }
    }

    pub fn len(&self) -> usize {
        self.readers
            .values()
            .flat_map(|keys| keys.values())
            .map(IndexSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
