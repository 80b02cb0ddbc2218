use indexmap::IndexSet;

use crate::ast::Key;

pub type KeySetId = usize;

/// Set holding the names of getters that must be rebuilt.
pub const ROOT_KEYS: KeySetId = 0;

#[derive(Debug, Default)]
struct KeySet {
    parent: Option<(KeySetId, Key)>,
    invalidated: IndexSet<Key>,
}

/// Arena of invalidated-key sets.
///
/// Every collection invocation owns a set for its callback keys, linked to the
/// (set, key) of the invocation that ran it, up to the root set.
#[derive(Debug)]
pub struct KeySets {
    sets: Vec<KeySet>,
    free: Vec<KeySetId>,
}

impl Default for KeySets {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySets {
    pub fn new() -> Self {
        Self {
            sets: vec![KeySet::default()],
            free: Vec::new(),
        }
    }

    /// New set owned by `key` of `parent`; released sets are handed out first.
    pub fn child(&mut self, parent: KeySetId, key: Key) -> KeySetId {
        let set = KeySet {
            parent: Some((parent, key)),
            invalidated: IndexSet::new(),
        };
        match self.free.pop() {
            Some(id) => {
                self.sets[id] = set;
                id
            }
            None => {
                self.sets.push(set);
                self.sets.len() - 1
            }
        }
    }

    /// Returns a set to the arena once its collection invocation is gone.
    pub fn release(&mut self, id: KeySetId) {
        if id == ROOT_KEYS || self.free.contains(&id) {
            return;
        }
        self.sets[id] = KeySet::default();
        self.free.push(id);
    }

    /// Marks `key` in `set` and the owning key of every ancestor set.
    pub fn invalidate(&mut self, set: KeySetId, key: Key) {
        let mut cursor = Some((set, key));
        while let Some((set, key)) = cursor {
            let entry = &mut self.sets[set];
            entry.invalidated.insert(key);
            cursor = entry.parent.clone();
        }
    }

    pub fn is_invalidated(&self, set: KeySetId, key: &Key) -> bool {
        self.sets[set].invalidated.contains(key)
    }

    pub fn remove(&mut self, set: KeySetId, key: &Key) -> bool {
        self.sets[set].invalidated.shift_remove(key)
    }

    pub fn take(&mut self, set: KeySetId) -> IndexSet<Key> {
        std::mem::take(&mut self.sets[set].invalidated)
    }

    pub fn is_empty(&self, set: KeySetId) -> bool {
        self.sets[set].invalidated.is_empty()
    }

    /// Sets in the arena, released ones included.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn live(&self) -> usize {
        self.sets.len() - self.free.len()
    }
}
