//! Named string attributes attached to objects.
//!
//! Each object keeps its metadata as an ordered list of pool keys. Names are
//! compared ignoring ASCII case and an object holds at most one entry per
//! name; adding a name that already exists replaces the old entry. Lists are
//! short (tens of entries), so lookups are a linear scan.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{ObjectError, ObjectResult};
use crate::object::ObjectRef;
use crate::pool::MetadataKey;
use crate::registry::Registry;

/// One name/value pair. The name is interned and shared across objects.
#[derive(Clone, PartialEq, Eq)]
pub struct Metadata {
    name: Rc<str>,
    value: String,
}

impl Metadata {
    pub(crate) fn new(name: Rc<str>, value: String) -> Self {
        Self { name, value }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metadata({:?} = {:?})", &*self.name, self.value)
    }
}

/// Names must survive being written as a single row token; values as the
/// trailing free-text field.
fn validate(name: &str, value: &str) -> ObjectResult<()> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name.contains(char::is_whitespace) {
        "name must not contain whitespace"
    } else if value.contains(['\n', '\r']) {
        "value must not contain line breaks"
    } else {
        return Ok(());
    };
    Err(ObjectError::InvalidMetadata {
        name: name.to_string(),
        reason: reason.into(),
    })
}

impl Registry {
    /// Attach `name = value` to `target`, replacing any entry whose name
    /// matches ignoring case.
    pub fn metadata_add(&mut self, target: ObjectRef, name: &str, value: &str) -> ObjectResult<&Metadata> {
        validate(name, value)?;
        self.object(target)?;

        if self.metadata_position(target, name)?.is_some() {
            self.metadata_delete(target, name)?;
        }

        let record = Metadata::new(self.names.get(name), value.to_string());
        let key = self.pool.alloc(record);
        self.object_mut(target)?.metadata.push(key);
        trace!(object = %target, name, "metadata added");

        self.pool
            .get(key)
            .ok_or(ObjectError::UnknownObject(target))
    }

    /// Look up the entry called `name`, ignoring case.
    pub fn metadata_find(&self, target: ObjectRef, name: &str) -> ObjectResult<Option<&Metadata>> {
        Ok(self
            .metadata_position(target, name)?
            .and_then(|(_, key)| self.pool.get(key)))
    }

    /// Remove the entry called `name`. Missing entries are not an error.
    pub fn metadata_delete(&mut self, target: ObjectRef, name: &str) -> ObjectResult<()> {
        let Some((index, key)) = self.metadata_position(target, name)? else {
            return Ok(());
        };
        self.object_mut(target)?.metadata.remove(index);
        self.release_record(key);
        trace!(object = %target, name, "metadata deleted");
        Ok(())
    }

    /// Remove every entry from `target`.
    pub fn metadata_delete_all(&mut self, target: ObjectRef) -> ObjectResult<()> {
        let keys = std::mem::take(&mut self.object_mut(target)?.metadata);
        for key in keys {
            self.release_record(key);
        }
        Ok(())
    }

    /// Entries of `target` in insertion order.
    pub fn metadata(&self, target: ObjectRef) -> ObjectResult<impl Iterator<Item = &Metadata> + '_> {
        let keys = &self.object(target)?.metadata;
        Ok(keys.iter().filter_map(|key| self.pool.get(*key)))
    }

    /// Number of entries on `target`.
    pub fn metadata_len(&self, target: ObjectRef) -> ObjectResult<usize> {
        Ok(self.object(target)?.metadata.len())
    }

    fn metadata_position(&self, target: ObjectRef, name: &str) -> ObjectResult<Option<(usize, MetadataKey)>> {
        let object = self.object(target)?;
        Ok(object.metadata.iter().enumerate().find_map(|(index, key)| {
            self.pool
                .get(*key)
                .filter(|md| md.name.eq_ignore_ascii_case(name))
                .map(|_| (index, *key))
        }))
    }

    /// Give a record back to the pool and drop its hold on the name.
    pub(crate) fn release_record(&mut self, key: MetadataKey) {
        if let Some(record) = self.pool.free(key) {
            self.names.release(&record.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_find_ignore_case() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "Private:Mark:Reason", "spam").unwrap();

        let md = reg.metadata_find(obj, "private:mark:reason").unwrap().unwrap();
        assert_eq!(md.name(), "Private:Mark:Reason");
        assert_eq!(md.value(), "spam");
    }

    #[test]
    fn add_replaces_same_name() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "Foo", "a").unwrap();
        reg.metadata_add(obj, "foo", "b").unwrap();

        assert_eq!(reg.metadata_len(obj).unwrap(), 1);
        assert_eq!(reg.metadata_find(obj, "FOO").unwrap().unwrap().value(), "b");
        assert_eq!(reg.metadata_records(), 1);
    }

    #[test]
    fn replaced_entry_moves_to_the_end() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "a", "1").unwrap();
        reg.metadata_add(obj, "b", "2").unwrap();
        reg.metadata_add(obj, "A", "3").unwrap();

        let pairs: Vec<_> = reg
            .metadata(obj)
            .unwrap()
            .map(|md| (md.name().to_string(), md.value().to_string()))
            .collect();
        assert_eq!(pairs, vec![("b".into(), "2".into()), ("A".into(), "3".into())]);
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "url", "x").unwrap();
        reg.metadata_delete(obj, "email").unwrap();
        assert_eq!(reg.metadata_len(obj).unwrap(), 1);
    }

    #[test]
    fn delete_releases_record_and_name() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "private:verify:founderchg:newfounder", "bob").unwrap();
        reg.metadata_add(obj, "private:verify:founderchg:timestamp", "1700000000").unwrap();

        reg.metadata_delete(obj, "private:verify:founderchg:newfounder").unwrap();
        reg.metadata_delete(obj, "private:verify:founderchg:timestamp").unwrap();

        assert_eq!(reg.metadata_records(), 0);
        assert_eq!(reg.interned_names(), 0);
    }

    #[test]
    fn names_are_shared_between_objects() {
        let mut reg = Registry::new();
        let a = reg.init(None, None);
        let b = reg.init(None, None);
        reg.metadata_add(a, "url", "https://a").unwrap();
        reg.metadata_add(b, "url", "https://b").unwrap();
        assert_eq!(reg.interned_names(), 1);

        reg.metadata_delete(a, "url").unwrap();
        assert_eq!(reg.interned_names(), 1);
        assert_eq!(reg.metadata_find(b, "url").unwrap().unwrap().value(), "https://b");
    }

    #[test]
    fn delete_all_clears_every_name() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        let names = ["url", "email", "Private:Entrymsg", "topic"];
        for name in names {
            reg.metadata_add(obj, name, "v").unwrap();
        }

        reg.metadata_delete_all(obj).unwrap();
        for name in names {
            assert!(reg.metadata_find(obj, name).unwrap().is_none());
        }
        assert_eq!(reg.metadata_records(), 0);
    }

    #[test]
    fn rejects_unwritable_entries() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);

        assert!(reg.metadata_add(obj, "", "v").is_err());
        assert!(reg.metadata_add(obj, "two words", "v").is_err());
        assert!(reg.metadata_add(obj, "tab\tname", "v").is_err());
        assert!(reg.metadata_add(obj, "nbsp\u{a0}name", "v").is_err());
        assert!(reg.metadata_add(obj, "k", "line\nbreak").is_err());
        assert!(reg.metadata_add(obj, "k", "").is_ok());
        assert!(reg.metadata_add(obj, "k", "free text with spaces").is_ok());
        assert!(reg.metadata_add(obj, "k", "tab\tinside").is_ok());
        assert_eq!(reg.metadata_len(obj).unwrap(), 1);
    }

    #[test]
    fn dead_object_is_reported() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.release(obj).unwrap();
        assert_eq!(
            reg.metadata_add(obj, "k", "v").unwrap_err(),
            ObjectError::UnknownObject(obj)
        );
        assert!(reg.metadata_find(obj, "k").is_err());
    }
}
