use std::collections::{BTreeMap, BTreeSet};

use crate::cascade::CandidateLookup;
use crate::condition::Condition;
use crate::context::Context;
use crate::hook::Hook;
use crate::KernelError;

/// In-memory hook collection keyed by id, with a secondary index on the
/// canonical form of each hook's condition.
///
/// Mutators return a new store and leave the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookStore {
    hooks: BTreeMap<String, Hook>,
    by_condition: BTreeMap<String, BTreeSet<String>>,
}

impl HookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Fails like [`HookStore::insert`] on the first rejected hook.
    pub fn from_hooks<I: IntoIterator<Item = Hook>>(hooks: I) -> Result<Self, KernelError> {
        let mut store = Self::new();
        for hook in hooks {
            store.put(hook, false)?;
        }
        Ok(store)
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] for a duplicate id or a hook that
    /// fails [`Hook::validate`].
    pub fn insert(&self, hook: Hook) -> Result<Self, KernelError> {
        let mut next = self.clone();
        next.put(hook, false)?;
        Ok(next)
    }

    /// Replace the stored hook with the same id.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] for an unknown id or an invalid hook.
    pub fn update(&self, hook: Hook) -> Result<Self, KernelError> {
        let mut next = self.clone();
        next.put(hook, true)?;
        Ok(next)
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] when no hook has `id`.
    pub fn delete(&self, id: &str) -> Result<Self, KernelError> {
        let mut next = self.clone();
        if next.remove(id).is_none() {
            return Err(KernelError::Validation(format!("unknown hook id `{id}`")));
        }
        Ok(next)
    }

    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&Hook> {
        self.hooks.get(id)
    }

    /// Stored hooks whose condition normalizes to the same form as `condition`.
    #[must_use]
    pub fn find_equivalent(&self, condition: &Condition) -> Vec<&Hook> {
        self.by_condition
            .get(&condition.canonical_key())
            .into_iter()
            .flatten()
            .filter_map(|id| self.hooks.get(id))
            .filter(|hook| hook.condition.equivalent(condition))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hooks in id order.
    pub fn hooks(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.values()
    }

    fn put(&mut self, hook: Hook, replace: bool) -> Result<(), KernelError> {
        hook.validate()?;
        let id = hook.metadata.id.as_str().to_string();
        match (self.hooks.contains_key(&id), replace) {
            (true, false) => {
                return Err(KernelError::Validation(format!("duplicate hook id `{id}`")));
            }
            (false, true) => {
                return Err(KernelError::Validation(format!("unknown hook id `{id}`")));
            }
            _ => {}
        }

        self.remove(&id);
        self.by_condition.entry(hook.condition.canonical_key()).or_default().insert(id.clone());
        self.hooks.insert(id, hook);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<Hook> {
        let hook = self.hooks.remove(id)?;
        let key = hook.condition.canonical_key();
        if let Some(ids) = self.by_condition.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_condition.remove(&key);
            }
        }
        Some(hook)
    }
}

impl CandidateLookup for HookStore {
    fn candidates_for(&self, _context: &Context) -> Vec<&Hook> {
        self.hooks.values().collect()
    }
}
