//! Per-object private data: a string-keyed side table for module state.
//!
//! The table does not own its values. It holds [`Weak`] references, so it
//! neither keeps a value alive nor frees it; the module that set a value
//! decides its lifetime. A value that has been dropped simply reads back as
//! absent. The map itself is created on the first `set` and discarded with
//! the object.

use std::any::Any;
use std::rc::{Rc, Weak};

use crate::error::ObjectResult;
use crate::object::{ObjectRef, PrivateData};
use crate::registry::Registry;

impl Registry {
    /// Fetch the value stored under `key`, if it is still alive and of type `T`.
    pub fn private_get<T: Any>(&self, target: ObjectRef, key: &str) -> ObjectResult<Option<Rc<T>>> {
        let object = self.object(target)?;
        Ok(object
            .privatedata
            .as_ref()
            .and_then(|map| map.get(key))
            .and_then(|weak| weak.upgrade())
            .and_then(|value| value.downcast::<T>().ok()))
    }

    /// Point `key` at `value`, replacing whatever was there.
    pub fn private_set<T: Any>(&mut self, target: ObjectRef, key: &str, value: &Rc<T>) -> ObjectResult<()> {
        let object = self.object_mut(target)?;
        let weak: Weak<T> = Rc::downgrade(value);
        object
            .privatedata
            .get_or_insert_with(PrivateData::new)
            .insert(key.to_string(), weak);
        Ok(())
    }

    /// Forget `key`. Returns `true` if it was present.
    pub fn private_remove(&mut self, target: ObjectRef, key: &str) -> ObjectResult<bool> {
        let object = self.object_mut(target)?;
        Ok(object
            .privatedata
            .as_mut()
            .is_some_and(|map| map.remove(key).is_some()))
    }
}
