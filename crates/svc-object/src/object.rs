use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Weak;

use crate::pool::MetadataKey;
use crate::registry::Registry;

/// Reference count value marking an object whose disposal is in progress.
pub const DISPOSING: i32 = -1;

/// Custom teardown for an entity type.
///
/// Runs exactly once, while the object is still addressable but already
/// unlinked from the registry list. It is responsible for the entity's own
/// state and is expected to clear the metadata it wants gone; whatever
/// metadata is left is released when the envelope is reclaimed afterwards.
pub type Destructor = Box<dyn FnOnce(&mut Registry, ObjectRef)>;

/// Non-owning private data map. See [`Registry::private_set`].
pub(crate) type PrivateData = HashMap<String, Weak<dyn Any>>;

/// Handle to an object envelope held by a [`Registry`].
///
/// Handles are plain copyable values. A handle whose object has been
/// reclaimed stays distinct from any object created later in the same slot,
/// so stale handles are rejected instead of aliasing a newcomer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub(crate) slot: usize,
    pub(crate) serial: u64,
}

impl ObjectRef {
    /// Monotonic creation number, unique within one registry.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}#{})", self.slot, self.serial)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.serial)
    }
}

/// Lifecycle envelope shared by every entity type.
pub(crate) struct Object {
    pub(crate) serial: u64,
    pub(crate) name: Option<String>,
    pub(crate) refcount: i32,
    pub(crate) dying: bool,
    pub(crate) destructor: Option<Destructor>,
    /// Pool keys in insertion order.
    pub(crate) metadata: Vec<MetadataKey>,
    pub(crate) privatedata: Option<PrivateData>,
}

impl Object {
    pub(crate) fn new(serial: u64, name: Option<&str>, destructor: Option<Destructor>) -> Self {
        Self {
            serial,
            name: name.map(str::to_string),
            refcount: 1,
            dying: false,
            destructor,
            metadata: Vec::new(),
            privatedata: None,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("serial", &self.serial)
            .field("name", &self.name)
            .field("refcount", &self.refcount)
            .field("dying", &self.dying)
            .field("has_destructor", &self.destructor.is_some())
            .field("metadata", &self.metadata.len())
            .field(
                "privatedata",
                &self.privatedata.as_ref().map(HashMap::len),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_serial() {
        let r = ObjectRef { slot: 3, serial: 17 };
        assert_eq!(r.to_string(), "obj#17");
        assert_eq!(format!("{r:?}"), "ObjectRef(3#17)");
    }

    #[test]
    fn new_object_holds_one_reference() {
        let obj = Object::new(1, Some("#chan"), None);
        assert_eq!(obj.refcount, 1);
        assert!(!obj.dying);
        assert!(obj.privatedata.is_none());
    }
}
