//! Shared storage for metadata key strings.
//!
//! Thousands of objects carry the same handful of metadata names
//! (`private:mark:setter`, `url`, ...). The interner keeps one `Rc<str>` per
//! distinct string and counts how many holders refer to it, dropping the
//! string once the last holder releases it.

use std::collections::HashMap;
use std::rc::Rc;

/// Reference-counted string table. Lookups are case-sensitive; callers
/// decide on their own equality rules.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: HashMap<Rc<str>, usize>,
}

impl StringInterner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared copy of `s`, taking one reference on it.
    pub fn get(&mut self, s: &str) -> Rc<str> {
        if let Some((shared, _)) = self.strings.get_key_value(s) {
            let shared = Rc::clone(shared);
            if let Some(holders) = self.strings.get_mut(s) {
                *holders += 1;
            }
            return shared;
        }

        let shared: Rc<str> = Rc::from(s);
        self.strings.insert(Rc::clone(&shared), 1);
        shared
    }

    /// Drop one reference on `s`. The entry disappears with its last holder.
    pub fn release(&mut self, s: &str) {
        let remaining = match self.strings.get_mut(s) {
            Some(holders) => {
                *holders = holders.saturating_sub(1);
                *holders
            }
            None => return,
        };
        if remaining == 0 {
            self.strings.remove(s);
        }
    }

    /// Number of references currently held on `s`.
    pub fn holders(&self, s: &str) -> usize {
        self.strings.get(s).copied().unwrap_or(0)
    }

    /// Number of distinct strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` if no strings are interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
