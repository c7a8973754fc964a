//! The object registry and its reference-counting rules.
//!
//! A [`Registry`] owns every live object envelope, the metadata pool they
//! draw records from, and the interner for metadata names. It is an ordinary
//! value: a daemon creates one at startup and passes it to the modules that
//! create entities; tests create as many as they like.
//!
//! # Lifecycle
//!
//! ```text
//! init ──► refcount 1 ──acquire/sink──► refcount n ──release→0──► dispose
//!                                                                   │
//!              refcount = -1, dying = true, unlinked from list ◄────┘
//!              destructor (or metadata_delete_all), envelope reclaimed
//! ```
//!
//! While an object is being disposed its refcount is pinned to
//! [`DISPOSING`]; `sink` and `release` calls that land on it from inside the
//! teardown are ignored and a nested `dispose` is rejected.

use std::fmt;

use indexmap::IndexSet;
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::config::RegistryConfig;
use crate::error::{ObjectError, ObjectResult};
use crate::interner::StringInterner;
use crate::object::{Destructor, Object, ObjectRef, DISPOSING};
use crate::pool::MetadataPool;

/// Owner of all object envelopes.
pub struct Registry {
    pub(crate) objects: Slab<Object>,
    /// Registered objects in creation order.
    list: IndexSet<ObjectRef>,
    pub(crate) pool: MetadataPool,
    pub(crate) names: StringInterner,
    next_serial: u64,
}

impl Registry {
    /// Create an empty registry with default tuning.
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    /// Create an empty registry.
    pub fn with_config(config: &RegistryConfig) -> Self {
        Self {
            objects: Slab::new(),
            list: IndexSet::new(),
            pool: MetadataPool::new(config.metadata_block),
            names: StringInterner::new(),
            next_serial: 0,
        }
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Create an object holding one reference and register it.
    ///
    /// With a `destructor`, disposal hands teardown to it; without one the
    /// metadata is deleted and the envelope freed.
    pub fn init(&mut self, name: Option<&str>, destructor: Option<Destructor>) -> ObjectRef {
        self.next_serial += 1;
        let serial = self.next_serial;
        let slot = self.objects.insert(Object::new(serial, name, destructor));
        let obj = ObjectRef { slot, serial };
        self.list.insert(obj);
        trace!(object = %obj, name = name.unwrap_or(""), "object registered");
        obj
    }

    /// Take one more reference on `obj`.
    pub fn acquire(&mut self, obj: ObjectRef) -> ObjectResult<ObjectRef> {
        let object = self.object_mut(obj)?;
        if object.dying {
            warn!(object = %obj, "refusing reference on object being disposed");
            return Err(ObjectError::AlreadyDisposing(obj));
        }
        object.refcount += 1;
        trace!(object = %obj, refcount = object.refcount, "object acquired");
        Ok(obj)
    }

    /// Drop one reference without disposing at zero.
    ///
    /// Teardown code uses this to give up references it holds on itself
    /// without re-entering disposal.
    pub fn sink(&mut self, obj: ObjectRef) -> ObjectResult<ObjectRef> {
        let object = self.object_mut(obj)?;
        if object.dying {
            return Ok(obj);
        }
        if object.refcount <= 0 {
            warn!(object = %obj, "reference dropped from object with no references");
            return Err(ObjectError::RefcountUnderflow(obj));
        }
        object.refcount -= 1;
        trace!(object = %obj, refcount = object.refcount, "object sunk");
        Ok(obj)
    }

    /// Drop one reference; dispose the object when none are left.
    pub fn release(&mut self, obj: ObjectRef) -> ObjectResult<()> {
        if self.object(obj)?.dying {
            return Ok(());
        }
        self.sink(obj)?;
        if self.object(obj)?.refcount == 0 {
            self.dispose(obj)?;
        }
        Ok(())
    }

    /// Tear `obj` down now, regardless of outstanding references.
    ///
    /// A second call while the first is still running is rejected with
    /// [`ObjectError::AlreadyDisposing`] and has no effect. Once disposal
    /// has finished the handle is dead and further calls report
    /// [`ObjectError::UnknownObject`].
    pub fn dispose(&mut self, obj: ObjectRef) -> ObjectResult<()> {
        let object = self.object_mut(obj)?;
        object.refcount = DISPOSING;

        if object.dying {
            warn!(object = %obj, "object is already being disposed");
            return Err(ObjectError::AlreadyDisposing(obj));
        }
        object.dying = true;
        let destructor = object.destructor.take();

        self.list.shift_remove(&obj);

        match destructor {
            Some(destructor) => destructor(self, obj),
            None => self.metadata_delete_all(obj)?,
        }

        if let Some(object) = self.reclaim(obj) {
            debug!(
                object = %obj,
                name = object.name.as_deref().unwrap_or(""),
                "object disposed"
            );
            // Structure only: values belong to whoever set them.
            drop(object.privatedata);
        }
        Ok(())
    }

    /// Remove the envelope, returning leftover metadata records to the pool.
    fn reclaim(&mut self, obj: ObjectRef) -> Option<Object> {
        self.object(obj).ok()?;
        let mut object = self.objects.remove(obj.slot);
        let leftover = std::mem::take(&mut object.metadata);
        if !leftover.is_empty() {
            trace!(object = %obj, count = leftover.len(), "releasing metadata left by destructor");
        }
        for key in leftover {
            self.release_record(key);
        }
        Some(object)
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Current reference count ([`DISPOSING`] during teardown).
    pub fn refcount(&self, obj: ObjectRef) -> ObjectResult<i32> {
        Ok(self.object(obj)?.refcount)
    }

    /// Returns `true` while `obj` is inside [`dispose`](Self::dispose).
    pub fn is_disposing(&self, obj: ObjectRef) -> ObjectResult<bool> {
        Ok(self.object(obj)?.dying)
    }

    /// Returns `true` if `obj` still names an envelope.
    pub fn contains(&self, obj: ObjectRef) -> bool {
        self.object(obj).is_ok()
    }

    /// Name given at [`init`](Self::init), if any.
    pub fn name(&self, obj: ObjectRef) -> ObjectResult<Option<&str>> {
        Ok(self.object(obj)?.name.as_deref())
    }

    /// First registered object whose name matches, ignoring ASCII case.
    pub fn find_by_name(&self, name: &str) -> Option<ObjectRef> {
        self.list.iter().copied().find(|obj| {
            self.object(*obj)
                .ok()
                .and_then(|o| o.name.as_deref())
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    /// Registered objects in creation order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.list.iter().copied()
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if no objects are registered.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Metadata records currently drawn from the pool, across all objects.
    pub fn metadata_records(&self) -> usize {
        self.pool.in_use()
    }

    /// Distinct metadata names currently interned.
    pub fn interned_names(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn object(&self, obj: ObjectRef) -> ObjectResult<&Object> {
        match self.objects.get(obj.slot) {
            Some(object) if object.serial == obj.serial => Ok(object),
            _ => Err(ObjectError::UnknownObject(obj)),
        }
    }

    pub(crate) fn object_mut(&mut self, obj: ObjectRef) -> ObjectResult<&mut Object> {
        match self.objects.get_mut(obj.slot) {
            Some(object) if object.serial == obj.serial => Ok(object),
            _ => Err(ObjectError::UnknownObject(obj)),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("objects", &self.list.len())
            .field("metadata_records", &self.pool.in_use())
            .field("interned_names", &self.names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use proptest::prelude::*;

    fn counting_destructor(calls: &Rc<Cell<u32>>) -> Destructor {
        let calls = Rc::clone(calls);
        Box::new(move |reg: &mut Registry, obj: ObjectRef| {
            calls.set(calls.get() + 1);
            reg.metadata_delete_all(obj).unwrap();
        })
    }

    #[test]
    fn init_registers_with_one_reference() {
        let mut reg = Registry::new();
        let obj = reg.init(Some("#services"), None);

        assert_eq!(reg.refcount(obj).unwrap(), 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.name(obj).unwrap(), Some("#services"));
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![obj]);
    }

    #[test]
    fn release_to_zero_disposes_once() {
        let mut reg = Registry::new();
        let calls = Rc::new(Cell::new(0));
        let obj = reg.init(None, Some(counting_destructor(&calls)));

        reg.acquire(obj).unwrap();
        reg.release(obj).unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(reg.refcount(obj).unwrap(), 1);

        reg.release(obj).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(!reg.contains(obj));
        assert!(reg.is_empty());
    }

    #[test]
    fn sink_never_disposes() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);

        reg.sink(obj).unwrap();
        assert_eq!(reg.refcount(obj).unwrap(), 0);
        assert!(reg.contains(obj));

        assert_eq!(reg.sink(obj), Err(ObjectError::RefcountUnderflow(obj)));
        assert_eq!(reg.refcount(obj).unwrap(), 0);
    }

    #[test]
    fn double_dispose_tears_down_once() {
        let mut reg = Registry::new();
        let calls = Rc::new(Cell::new(0));
        let obj = reg.init(None, Some(counting_destructor(&calls)));

        reg.dispose(obj).unwrap();
        assert_eq!(reg.dispose(obj), Err(ObjectError::UnknownObject(obj)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reentrant_teardown_is_rejected() {
        let mut reg = Registry::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);

        let obj = reg.init(
            Some("loop"),
            Some(Box::new(move |reg: &mut Registry, obj: ObjectRef| {
                log.borrow_mut().push(reg.refcount(obj).unwrap());
                log.borrow_mut().push(reg.len() as i32);
                // Neither a nested release nor a nested dispose may start a
                // second teardown.
                reg.release(obj).unwrap();
                assert_eq!(reg.dispose(obj), Err(ObjectError::AlreadyDisposing(obj)));
                assert!(reg.acquire(obj).is_err());
                assert!(reg.is_disposing(obj).unwrap());
            })),
        );

        reg.release(obj).unwrap();
        assert_eq!(*seen.borrow(), vec![DISPOSING, 0]);
        assert!(!reg.contains(obj));
    }

    #[test]
    fn default_teardown_returns_metadata_to_pool() {
        let mut reg = Registry::new();
        let obj = reg.init(None, None);
        reg.metadata_add(obj, "url", "https://example.org").unwrap();
        reg.metadata_add(obj, "email", "ops@example.org").unwrap();
        assert_eq!(reg.metadata_records(), 2);

        reg.release(obj).unwrap();
        assert_eq!(reg.metadata_records(), 0);
        assert_eq!(reg.interned_names(), 0);
    }

    #[test]
    fn metadata_left_by_destructor_is_reclaimed() {
        let mut reg = Registry::new();
        let obj = reg.init(None, Some(Box::new(|_: &mut Registry, _: ObjectRef| {})));
        reg.metadata_add(obj, "private:entrymsg", "welcome").unwrap();

        reg.dispose(obj).unwrap();
        assert_eq!(reg.metadata_records(), 0);
    }

    #[test]
    fn stale_handle_does_not_alias_new_object() {
        let mut reg = Registry::new();
        let old = reg.init(Some("old"), None);
        reg.release(old).unwrap();

        let new = reg.init(Some("new"), None);
        assert_eq!(old.slot, new.slot);
        assert_eq!(reg.acquire(old), Err(ObjectError::UnknownObject(old)));
        assert_eq!(reg.refcount(new).unwrap(), 1);
    }

    #[test]
    fn iteration_follows_creation_order() {
        let mut reg = Registry::new();
        let a = reg.init(Some("a"), None);
        let b = reg.init(Some("b"), None);
        let c = reg.init(Some("c"), None);
        reg.release(b).unwrap();

        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(reg.find_by_name("C"), Some(c));
        assert_eq!(reg.find_by_name("b"), None);
    }

    #[test]
    fn independent_registries() {
        let mut one = Registry::new();
        let mut two = Registry::new();
        let a = one.init(None, None);
        two.init(None, None);
        two.init(None, None);

        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 2);
        one.release(a).unwrap();
        assert_eq!(two.len(), 2);
    }

    proptest! {
        #[test]
        fn refcount_is_conserved(acquires in 0u32..64, releases in 0u32..64) {
            let releases = releases.min(acquires);
            let mut reg = Registry::new();
            let calls = Rc::new(Cell::new(0));
            let obj = reg.init(None, Some(counting_destructor(&calls)));

            for _ in 0..acquires {
                reg.acquire(obj).unwrap();
            }
            for _ in 0..releases {
                reg.release(obj).unwrap();
            }
            prop_assert_eq!(reg.refcount(obj).unwrap(), 1 + acquires as i32 - releases as i32);
            prop_assert_eq!(calls.get(), 0);

            for _ in 0..(1 + acquires - releases) {
                reg.release(obj).unwrap();
            }
            prop_assert_eq!(calls.get(), 1);
            prop_assert!(!reg.contains(obj));
        }
    }
}
