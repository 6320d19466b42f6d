use crate::context::register::RegisterKey;
use crate::value::SymValue;
use std::collections::HashMap;

/// The current value of every register written so far.
///
/// Values are immutable terms; a write replaces the binding and the new term refers to the old
/// one wherever it depends on it, so cloning a store is a cheap snapshot.
#[derive(Clone, Debug, Default)]
pub struct SymStore {
    values: HashMap<RegisterKey, SymValue>,
}

impl SymStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RegisterKey) -> Option<&SymValue> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: RegisterKey, value: SymValue) -> Option<SymValue> {
        self.values.insert(key, value)
    }

    pub fn contains(&self, key: &RegisterKey) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegisterKey, &SymValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
