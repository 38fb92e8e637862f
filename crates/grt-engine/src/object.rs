//! Object space
//!
//! Objects live in a single arena owned by the runtime context and are
//! addressed by [`ObjectId`] handles. The `owner` field is a back-reference
//! to the structural parent in the object tree - a plain handle, never a
//! memory-ownership edge - which keeps the tree-validation pass trivial and
//! removes lifetime ambiguity from the graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::reflect::MetaClass;
use crate::value::Value;

/// Handle to an object in the runtime's object space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A structural change somewhere in the object tree.
///
/// Delivered to observers registered on the runtime; owned containers
/// report the owning object and member they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// An object member was assigned
    MemberChanged {
        /// The object whose member changed
        object: ObjectId,
        /// Member name
        member: String,
    },
    /// An item was inserted into an owned list member
    ListItemAdded {
        /// Owning object
        object: ObjectId,
        /// Member name of the list
        member: String,
        /// Insert position
        index: usize,
    },
    /// An item was removed from an owned list member
    ListItemRemoved {
        /// Owning object
        object: ObjectId,
        /// Member name of the list
        member: String,
        /// Removed position
        index: usize,
    },
    /// A key was set in an owned dict member
    DictItemSet {
        /// Owning object
        object: ObjectId,
        /// Member name of the dict
        member: String,
        /// Affected key
        key: String,
    },
    /// A key was removed from an owned dict member
    DictItemRemoved {
        /// Owning object
        object: ObjectId,
        /// Member name of the dict
        member: String,
        /// Affected key
        key: String,
    },
}

pub(crate) struct ObjectData {
    pub guid: String,
    pub class: Arc<MetaClass>,
    pub owner: Option<ObjectId>,
    pub members: BTreeMap<String, Value>,
}

/// Arena of object instances.
///
/// Slots stay valid for the lifetime of the runtime; handles are never
/// reused.
#[derive(Default)]
pub(crate) struct ObjectSpace {
    slots: RwLock<Vec<ObjectData>>,
}

impl ObjectSpace {
    pub fn insert(&self, data: ObjectData) -> ObjectId {
        let mut slots = self.slots.write();
        let id = ObjectId(slots.len() as u32);
        slots.push(data);
        id
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        (id.0 as usize) < self.slots.read().len()
    }

    pub fn guid(&self, id: ObjectId) -> Option<String> {
        self.slots
            .read()
            .get(id.0 as usize)
            .map(|d| d.guid.clone())
    }

    pub fn set_guid(&self, id: ObjectId, guid: String) {
        if let Some(data) = self.slots.write().get_mut(id.0 as usize) {
            data.guid = guid;
        }
    }

    pub fn class(&self, id: ObjectId) -> Option<Arc<MetaClass>> {
        self.slots
            .read()
            .get(id.0 as usize)
            .map(|d| d.class.clone())
    }

    pub fn owner(&self, id: ObjectId) -> Option<ObjectId> {
        self.slots
            .read()
            .get(id.0 as usize)
            .and_then(|d| d.owner)
    }

    pub fn set_owner(&self, id: ObjectId, owner: Option<ObjectId>) {
        if let Some(data) = self.slots.write().get_mut(id.0 as usize) {
            data.owner = owner;
        }
    }

    /// Stored value of a member, if the member has storage
    pub fn member(&self, id: ObjectId, name: &str) -> Option<Value> {
        self.slots
            .read()
            .get(id.0 as usize)
            .and_then(|d| d.members.get(name).cloned())
    }

    pub fn set_member_raw(&self, id: ObjectId, name: &str, value: Value) {
        if let Some(data) = self.slots.write().get_mut(id.0 as usize) {
            data.members.insert(name.to_string(), value);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }
}
