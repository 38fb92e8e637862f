//! Tagged value model
//!
//! A [`Value`] represents any GRT datum uniformly, regardless of origin
//! language. Simple values (integer, double, string) are immutable and
//! freely shared. Lists and dicts are shared-ownership containers with
//! interior mutability; all mutation goes through their accessor methods,
//! which enforce the declared content type. Objects are referenced by
//! [`ObjectId`] handle into the runtime's object space.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use grt_sdk::{GrtError, GrtResult, SimpleTypeSpec, Type};

use crate::object::{ChangeEvent, ObjectId};
use crate::runtime::Runtime;

/// A GRT value: tagged union over the six runtime types plus null.
///
/// Cloning is cheap for every variant (ids, `Arc`s, or small scalars).
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent/invalid value
    #[default]
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Double(f64),
    /// Immutable UTF-8 string
    String(Arc<str>),
    /// Shared list container
    List(ListRef),
    /// Shared dict container
    Dict(DictRef),
    /// Reference to an object in the runtime's object space
    Object(ObjectId),
}

impl Value {
    /// The runtime type tag of this value (`Type::Any` for null)
    pub fn type_(&self) -> Type {
        match self {
            Value::Null => Type::Any,
            Value::Integer(_) => Type::Integer,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::List(_) => Type::List,
            Value::Dict(_) => Type::Dict,
            Value::Object(_) => Type::Object,
        }
    }

    /// Short type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            _ => self.type_().tag(),
        }
    }

    /// Whether this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this is an immutable simple value
    pub fn is_simple(&self) -> bool {
        self.type_().is_simple()
    }

    /// Extract an integer, failing with a type error otherwise
    pub fn as_int(&self) -> GrtResult<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            other => Err(GrtError::type_mismatch("int", other.type_name())),
        }
    }

    /// Extract a double, failing with a type error otherwise
    pub fn as_double(&self) -> GrtResult<f64> {
        match self {
            Value::Double(d) => Ok(*d),
            other => Err(GrtError::type_mismatch("double", other.type_name())),
        }
    }

    /// Extract a string, failing with a type error otherwise
    pub fn as_string(&self) -> GrtResult<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(GrtError::type_mismatch("string", other.type_name())),
        }
    }

    /// Extract a list reference, failing with a type error otherwise
    pub fn as_list(&self) -> GrtResult<ListRef> {
        match self {
            Value::List(l) => Ok(l.clone()),
            other => Err(GrtError::type_mismatch("list", other.type_name())),
        }
    }

    /// Extract a dict reference, failing with a type error otherwise
    pub fn as_dict(&self) -> GrtResult<DictRef> {
        match self {
            Value::Dict(d) => Ok(d.clone()),
            other => Err(GrtError::type_mismatch("dict", other.type_name())),
        }
    }

    /// Extract an object id, failing with a type error otherwise
    pub fn as_object(&self) -> GrtResult<ObjectId> {
        match self {
            Value::Object(id) => Ok(*id),
            other => Err(GrtError::type_mismatch("object", other.type_name())),
        }
    }

    /// Render the value for display.
    ///
    /// Containers render recursively; objects render as `class:guid`.
    pub fn to_display_string(&self, rt: &Runtime) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::String(s) => s.to_string(),
            Value::List(l) => {
                let parts: Vec<String> =
                    l.items().iter().map(|v| v.to_display_string(rt)).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(d) => {
                let parts: Vec<String> = d
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v.to_display_string(rt)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Object(id) => match rt.object_class_name(*id) {
                Some(class) => format!("{}:{}", class, rt.object_guid(*id).unwrap_or_default()),
                None => format!("<dead object {id}>"),
            },
        }
    }

    /// Multi-line diagnostic rendering with nested indentation.
    ///
    /// Objects print their class, guid, and members; containers indent
    /// their contents one level per depth.
    pub fn debug_description(&self, rt: &Runtime, indentation: &str) -> String {
        let deeper = format!("{indentation}  ");
        match self {
            Value::List(l) => {
                let mut out = String::from("[\n");
                for item in l.items() {
                    out.push_str(&format!(
                        "{deeper}{}\n",
                        item.debug_description(rt, &deeper)
                    ));
                }
                out.push_str(&format!("{indentation}]"));
                out
            }
            Value::Dict(d) => {
                let mut out = String::from("{\n");
                for (key, item) in d.entries() {
                    out.push_str(&format!(
                        "{deeper}{key} = {}\n",
                        item.debug_description(rt, &deeper)
                    ));
                }
                out.push_str(&format!("{indentation}}}"));
                out
            }
            Value::Object(id) => match rt.object_class_name(*id) {
                Some(class) => {
                    let mut out = format!(
                        "{} ({}) {{\n",
                        class,
                        rt.object_guid(*id).unwrap_or_default()
                    );
                    rt.foreach_member(&class, |member| {
                        if let Ok(value) = rt.get_member(*id, &member.name) {
                            out.push_str(&format!(
                                "{deeper}{} = {}\n",
                                member.name,
                                value.debug_description(rt, &deeper)
                            ));
                        }
                    });
                    out.push_str(&format!("{indentation}}}"));
                    out
                }
                None => format!("<dead object {id}>"),
            },
            other => other.to_display_string(rt),
        }
    }
}

// Simple values compare by content, containers by identity, objects by id.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ref_eq(b),
            (Value::Dict(a), Value::Dict(b)) => a.ref_eq(b),
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v.as_str()))
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::Object(v)
    }
}

// ============================================================================
// ListRef
// ============================================================================

struct ListInner {
    content_type: SimpleTypeSpec,
    allow_null: bool,
    /// Set when this list is an owned member of an object: (owner, member name)
    owned_by: Option<(ObjectId, String)>,
    items: RwLock<Vec<Value>>,
}

/// Shared reference to a GRT list.
///
/// Equality between `ListRef`s is identity (same underlying container).
#[derive(Clone)]
pub struct ListRef(Arc<ListInner>);

impl ListRef {
    /// Create an untyped list accepting any content
    pub fn new() -> Self {
        Self::typed(SimpleTypeSpec::default(), true)
    }

    /// Create a list with a declared content type
    pub fn typed(content_type: SimpleTypeSpec, allow_null: bool) -> Self {
        ListRef(Arc::new(ListInner {
            content_type,
            allow_null,
            owned_by: None,
            items: RwLock::new(Vec::new()),
        }))
    }

    /// Create an owned member list attached to `owner`
    pub(crate) fn owned(
        content_type: SimpleTypeSpec,
        allow_null: bool,
        owner: ObjectId,
        member: &str,
    ) -> Self {
        ListRef(Arc::new(ListInner {
            content_type,
            allow_null,
            owned_by: Some((owner, member.to_string())),
            items: RwLock::new(Vec::new()),
        }))
    }

    /// Build an untyped list from existing values (no content check)
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let list = ListRef::new();
        list.0.items.write().extend(values);
        list
    }

    /// Declared content type of the list
    pub fn content_type(&self) -> &SimpleTypeSpec {
        &self.0.content_type
    }

    /// Whether null entries are accepted
    pub fn null_allowed(&self) -> bool {
        self.0.allow_null
    }

    /// The object owning this list, when it is an owned member
    pub fn owner(&self) -> Option<ObjectId> {
        self.0.owned_by.as_ref().map(|(id, _)| *id)
    }

    /// Identity of the underlying container, for visited-set bookkeeping
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Whether two refs point at the same underlying container
    pub fn ref_eq(&self, other: &ListRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of items
    pub fn count(&self) -> usize {
        self.0.items.read().len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Get the item at `index`
    pub fn get(&self, index: usize) -> GrtResult<Value> {
        let items = self.0.items.read();
        items.get(index).cloned().ok_or(GrtError::BadIndex {
            index,
            count: items.len(),
        })
    }

    /// Snapshot of all items
    pub fn items(&self) -> Vec<Value> {
        self.0.items.read().clone()
    }

    /// Index of the first item equal to `value`
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.0.items.read().iter().position(|v| v == value)
    }

    fn check_assignable(&self, rt: &Runtime, value: &Value) -> GrtResult<()> {
        if value.is_null() {
            if self.0.allow_null {
                return Ok(());
            }
            return Err(GrtError::NullValue(
                "inserting null value into a non-null list".to_string(),
            ));
        }
        rt.check_content(&self.0.content_type, value)
    }

    /// Append a value, enforcing the declared content type.
    ///
    /// A failed insert leaves the list unchanged.
    pub fn insert(&self, rt: &Runtime, value: Value) -> GrtResult<()> {
        self.insert_at(rt, self.count(), value)
    }

    /// Insert a value at `index`, enforcing the declared content type
    pub fn insert_at(&self, rt: &Runtime, index: usize, value: Value) -> GrtResult<()> {
        self.check_assignable(rt, &value)?;
        {
            let mut items = self.0.items.write();
            if index > items.len() {
                return Err(GrtError::BadIndex {
                    index,
                    count: items.len(),
                });
            }
            items.insert(index, value);
        }
        self.notify(rt, index, true);
        Ok(())
    }

    /// Replace the item at `index`, enforcing the declared content type
    pub fn set(&self, rt: &Runtime, index: usize, value: Value) -> GrtResult<()> {
        self.check_assignable(rt, &value)?;
        {
            let mut items = self.0.items.write();
            if index >= items.len() {
                return Err(GrtError::BadIndex {
                    index,
                    count: items.len(),
                });
            }
            items[index] = value;
        }
        self.notify(rt, index, false);
        self.notify(rt, index, true);
        Ok(())
    }

    /// Remove the item at `index`
    pub fn remove(&self, rt: &Runtime, index: usize) -> GrtResult<()> {
        {
            let mut items = self.0.items.write();
            if index >= items.len() {
                return Err(GrtError::BadIndex {
                    index,
                    count: items.len(),
                });
            }
            items.remove(index);
        }
        self.notify(rt, index, false);
        Ok(())
    }

    /// Remove every item equal to `value`
    pub fn remove_value(&self, rt: &Runtime, value: &Value) {
        let mut removed = Vec::new();
        {
            let mut items = self.0.items.write();
            let mut i = items.len();
            while i > 0 {
                i -= 1;
                if &items[i] == value {
                    items.remove(i);
                    removed.push(i);
                }
            }
        }
        for index in removed {
            self.notify(rt, index, false);
        }
    }

    /// Move the item at `old_index` so it ends up at `new_index`.
    ///
    /// Indexes refer to positions in the list as it is before the move;
    /// a `new_index` past the end moves the item to the back.
    pub fn reorder(&self, rt: &Runtime, old_index: usize, new_index: usize) -> GrtResult<()> {
        {
            let mut items = self.0.items.write();
            if old_index >= items.len() {
                return Err(GrtError::BadIndex {
                    index: old_index,
                    count: items.len(),
                });
            }
            if old_index == new_index {
                return Ok(());
            }
            let item = items.remove(old_index);
            let target = new_index.min(items.len());
            items.insert(target, item);
        }
        self.notify(rt, new_index, true);
        Ok(())
    }

    fn notify(&self, rt: &Runtime, index: usize, added: bool) {
        if let Some((owner, member)) = &self.0.owned_by {
            rt.emit(if added {
                ChangeEvent::ListItemAdded {
                    object: *owner,
                    member: member.clone(),
                    index,
                }
            } else {
                ChangeEvent::ListItemRemoved {
                    object: *owner,
                    member: member.clone(),
                    index,
                }
            });
        }
    }
}

impl Default for ListRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListRef")
            .field("content_type", &self.0.content_type)
            .field("count", &self.count())
            .finish()
    }
}

// ============================================================================
// DictRef
// ============================================================================

struct DictInner {
    content_type: SimpleTypeSpec,
    allow_null: bool,
    owned_by: Option<(ObjectId, String)>,
    entries: RwLock<BTreeMap<String, Value>>,
}

/// Shared reference to a GRT dict.
///
/// Keys iterate in lexicographic order. Equality between `DictRef`s is
/// identity (same underlying container).
#[derive(Clone)]
pub struct DictRef(Arc<DictInner>);

impl DictRef {
    /// Create an untyped dict accepting any content
    pub fn new() -> Self {
        Self::typed(SimpleTypeSpec::default(), true)
    }

    /// Create a dict with a declared content type
    pub fn typed(content_type: SimpleTypeSpec, allow_null: bool) -> Self {
        DictRef(Arc::new(DictInner {
            content_type,
            allow_null,
            owned_by: None,
            entries: RwLock::new(BTreeMap::new()),
        }))
    }

    /// Create an owned member dict attached to `owner`
    pub(crate) fn owned(
        content_type: SimpleTypeSpec,
        allow_null: bool,
        owner: ObjectId,
        member: &str,
    ) -> Self {
        DictRef(Arc::new(DictInner {
            content_type,
            allow_null,
            owned_by: Some((owner, member.to_string())),
            entries: RwLock::new(BTreeMap::new()),
        }))
    }

    /// Declared content type of the dict
    pub fn content_type(&self) -> &SimpleTypeSpec {
        &self.0.content_type
    }

    /// The object owning this dict, when it is an owned member
    pub fn owner(&self) -> Option<ObjectId> {
        self.0.owned_by.as_ref().map(|(id, _)| *id)
    }

    /// Identity of the underlying container, for visited-set bookkeeping
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Whether two refs point at the same underlying container
    pub fn ref_eq(&self, other: &DictRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.0.entries.read().len()
    }

    /// Whether the dict is empty
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether `key` is present
    pub fn has_key(&self, key: &str) -> bool {
        self.0.entries.read().contains_key(key)
    }

    /// Get the value for `key`, signaling `BadItem` when missing
    pub fn get(&self, key: &str) -> GrtResult<Value> {
        self.0
            .entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| GrtError::BadItem(key.to_string()))
    }

    /// Get the value for `key` if present
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.0.entries.read().get(key).cloned()
    }

    /// All keys, in iteration order
    pub fn keys(&self) -> Vec<String> {
        self.0.entries.read().keys().cloned().collect()
    }

    /// Snapshot of all entries, in iteration order
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set `key` to `value`, enforcing the declared content type
    pub fn set(&self, rt: &Runtime, key: &str, value: Value) -> GrtResult<()> {
        if value.is_null() {
            if !self.0.allow_null {
                return Err(GrtError::NullValue(
                    "inserting null value into a non-null dict".to_string(),
                ));
            }
        } else {
            rt.check_content(&self.0.content_type, &value)?;
        }
        self.0.entries.write().insert(key.to_string(), value);
        if let Some((owner, member)) = &self.0.owned_by {
            rt.emit(ChangeEvent::DictItemSet {
                object: *owner,
                member: member.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Remove `key` if present; removing an absent key is not an error
    pub fn remove(&self, rt: &Runtime, key: &str) {
        let removed = self.0.entries.write().remove(key).is_some();
        if removed {
            if let Some((owner, member)) = &self.0.owned_by {
                rt.emit(ChangeEvent::DictItemRemoved {
                    object: *owner,
                    member: member.clone(),
                    key: key.to_string(),
                });
            }
        }
    }
}

impl Default for DictRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DictRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictRef")
            .field("content_type", &self.0.content_type)
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeOptions};

    fn rt() -> std::sync::Arc<Runtime> {
        Runtime::new(RuntimeOptions::default())
    }

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Value::Null.type_(), Type::Any);
        assert_eq!(Value::from(42).type_(), Type::Integer);
        assert_eq!(Value::from(1.5).type_(), Type::Double);
        assert_eq!(Value::from("hi").type_(), Type::String);
        assert_eq!(Value::List(ListRef::new()).type_(), Type::List);
        assert_eq!(Value::Dict(DictRef::new()).type_(), Type::Dict);
    }

    #[test]
    fn test_value_casts() {
        assert_eq!(Value::from(42).as_int().unwrap(), 42);
        assert!(Value::from("x").as_int().is_err());
        assert_eq!(Value::from("x").as_string().unwrap(), "x");
        assert!(Value::Null.as_list().is_err());
    }

    #[test]
    fn test_simple_equality_by_content() {
        assert_eq!(Value::from(1), Value::from(1));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::from(1), Value::from(2));
        assert_ne!(Value::from(1), Value::from(1.0));
    }

    #[test]
    fn test_container_equality_by_identity() {
        let a = ListRef::new();
        let b = a.clone();
        let c = ListRef::new();
        assert_eq!(Value::List(a.clone()), Value::List(b));
        assert_ne!(Value::List(a), Value::List(c));
    }

    #[test]
    fn test_list_basic_ops() {
        let rt = rt();
        let list = ListRef::new();
        list.insert(&rt, Value::from(1)).unwrap();
        list.insert(&rt, Value::from("two")).unwrap();
        assert_eq!(list.count(), 2);
        assert_eq!(list.get(0).unwrap(), Value::from(1));
        assert_eq!(list.index_of(&Value::from("two")), Some(1));

        list.set(&rt, 0, Value::from(10)).unwrap();
        assert_eq!(list.get(0).unwrap(), Value::from(10));

        list.remove(&rt, 0).unwrap();
        assert_eq!(list.count(), 1);
        assert!(matches!(
            list.get(5),
            Err(GrtError::BadIndex { index: 5, count: 1 })
        ));
    }

    #[test]
    fn test_typed_list_rejects_mismatch() {
        let rt = rt();
        let list = ListRef::typed(SimpleTypeSpec::of(Type::Integer), false);
        list.insert(&rt, Value::from(1)).unwrap();

        // mismatched insert fails and leaves the list unchanged
        let err = list.insert(&rt, Value::from("nope")).unwrap_err();
        assert!(matches!(err, GrtError::Type { .. }));
        assert_eq!(list.count(), 1);
        assert_eq!(list.get(0).unwrap(), Value::from(1));

        // null rejected when not allowed
        assert!(matches!(
            list.insert(&rt, Value::Null),
            Err(GrtError::NullValue(_))
        ));
    }

    #[test]
    fn test_list_reorder_semantics() {
        let rt = rt();
        let list = ListRef::new();
        for i in 0..4 {
            list.insert(&rt, Value::from(i)).unwrap();
        }
        // [0,1,2,3] -> move 0 to index 2 -> [1,2,0,3]
        list.reorder(&rt, 0, 2).unwrap();
        let items: Vec<i64> = list.items().iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(items, vec![1, 2, 0, 3]);

        // move last to front
        list.reorder(&rt, 3, 0).unwrap();
        let items: Vec<i64> = list.items().iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(items, vec![3, 1, 2, 0]);

        // target past the end lands at the back
        list.reorder(&rt, 0, 99).unwrap();
        let items: Vec<i64> = list.items().iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(items, vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_dict_ops() {
        let rt = rt();
        let dict = DictRef::new();
        dict.set(&rt, "a", Value::from(1)).unwrap();
        dict.set(&rt, "b", Value::from("x")).unwrap();
        assert!(dict.has_key("a"));
        assert_eq!(dict.get("b").unwrap(), Value::from("x"));
        assert!(matches!(dict.get("missing"), Err(GrtError::BadItem(_))));
        assert_eq!(dict.keys(), vec!["a".to_string(), "b".to_string()]);

        dict.remove(&rt, "a");
        assert!(!dict.has_key("a"));
        // removing again is not an error
        dict.remove(&rt, "a");
    }

    #[test]
    fn test_typed_dict_rejects_mismatch() {
        let rt = rt();
        let dict = DictRef::typed(SimpleTypeSpec::of(Type::String), true);
        dict.set(&rt, "ok", Value::from("fine")).unwrap();
        assert!(dict.set(&rt, "bad", Value::from(3)).is_err());
        assert!(!dict.has_key("bad"));
        // null allowed here
        dict.set(&rt, "none", Value::Null).unwrap();
    }

    #[test]
    fn test_display_strings() {
        let rt = rt();
        let list = ListRef::new();
        list.insert(&rt, Value::from(1)).unwrap();
        list.insert(&rt, Value::from("a")).unwrap();
        assert_eq!(Value::List(list).to_display_string(&rt), "[1, a]");

        let dict = DictRef::new();
        dict.set(&rt, "k", Value::from(2)).unwrap();
        assert_eq!(Value::Dict(dict).to_display_string(&rt), "{k = 2}");
        assert_eq!(Value::Null.to_display_string(&rt), "NULL");
    }
}
