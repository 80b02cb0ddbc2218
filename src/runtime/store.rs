use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use super::keysets::KeySetId;
use super::value::{ContainerId, Value};
use crate::ast::Key;
use crate::tagging::ExprId;

/// Persistent slot address: structural id plus invocation context.
pub type SlotId = (ExprId, KeySetId, Key);

/// Long-lived state per expression occurrence and invocation context.
///
/// Slots are grouped by the invocation that owns them so everything an
/// invocation left behind can be dropped in one go.
#[derive(Debug)]
pub struct Store<T> {
    slots: FxHashMap<(KeySetId, Key), FxHashMap<ExprId, T>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            slots: FxHashMap::default(),
        }
    }
}

impl<T> Store<T> {
    pub fn get(&self, (expr, keys, key): &SlotId) -> Option<&T> {
        self.slots.get(&(*keys, key.clone()))?.get(expr)
    }

    pub fn take(&mut self, (expr, keys, key): &SlotId) -> Option<T> {
        let owner = (*keys, key.clone());
        let owned = self.slots.get_mut(&owner)?;
        let state = owned.remove(expr);
        if owned.is_empty() {
            self.slots.remove(&owner);
        }
        state
    }

    pub fn put(&mut self, (expr, keys, key): SlotId, state: T) {
        self.slots.entry((keys, key)).or_default().insert(expr, state);
    }

    /// Removes every slot owned by the invocation at `(keys, key)`.
    pub fn release(&mut self, keys: KeySetId, key: &Key) -> Vec<T> {
        self.slots
            .remove(&(keys, key.clone()))
            .map(|owned| owned.into_values().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Last published value of a primitive, with the stamp of the source it was
/// derived from.
#[derive(Debug, Clone)]
pub struct Cached {
    pub source: Option<(ContainerId, u64)>,
    pub value: Value,
}

/// Per-invocation state of a collection primitive.
#[derive(Debug)]
pub struct CollectionState {
    /// Key set of the callback invocations.
    pub keys: KeySetId,
    pub context: Option<Value>,
    /// Source entries seen by the last run.
    pub inputs: IndexMap<Key, Value>,
    /// Callback result per source key.
    pub results: IndexMap<Key, Value>,
    /// Recursive callbacks: key → keys whose result read it through `recur`.
    pub dependents: FxHashMap<Key, FxHashSet<Key>>,
    pub output: Option<Value>,
}

impl CollectionState {
    pub fn new(keys: KeySetId) -> Self {
        Self {
            keys,
            context: None,
            inputs: IndexMap::new(),
            results: IndexMap::new(),
            dependents: FxHashMap::default(),
            output: None,
        }
    }

    pub fn reset(&mut self) {
        self.inputs.clear();
        self.results.clear();
        self.dependents.clear();
    }

    /// Drops the results of `stale` and of every key that recurred into one.
    pub fn expire(&mut self, stale: &mut Vec<Key>) {
        let mut index = 0;
        while index < stale.len() {
            let key = stale[index].clone();
            if let Some(dependents) = self.dependents.remove(&key) {
                for dependent in dependents {
                    if !stale.contains(&dependent) {
                        stale.push(dependent);
                    }
                }
            }
            self.results.shift_remove(&key);
            index += 1;
        }
    }
}
