//! Value and object copying
//!
//! Deep copies of object graphs are a two-phase algorithm: first every
//! reachable owned object is duplicated while a `original guid → copy` side
//! table is built, then [`CopyContext::update_references`] runs a fixup pass
//! substituting copied targets into non-owning (`dontfollow`) references.
//! The second pass is required because a forward-referenced target may not
//! have been copied yet when the referencing member is visited.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use grt_sdk::{GrtResult, GrtError, Type};

use crate::get_guid;
use crate::object::ObjectId;
use crate::reflect::Member;
use crate::runtime::Runtime;
use crate::value::{DictRef, ListRef, Value};

/// Tracks the copies produced by one logical copy operation
#[derive(Debug, Default)]
pub struct CopyContext {
    /// original guid → its copy
    object_copies: FxHashMap<String, ObjectId>,
    /// top-level copies produced, in order
    copies: Vec<ObjectId>,
}

impl CopyContext {
    /// Create an empty context
    pub fn new() -> Self {
        CopyContext::default()
    }

    /// Deep-copy an object; owned content is duplicated recursively,
    /// non-owning references are left for [`CopyContext::update_references`].
    pub fn copy(
        &mut self,
        rt: &Runtime,
        object: ObjectId,
        skip_members: &HashSet<String>,
    ) -> GrtResult<ObjectId> {
        let copy = self.duplicate_object(rt, object, skip_members, false)?;
        self.copies.push(copy);
        Ok(copy)
    }

    /// Copy an object sharing all of its content (owned members included)
    pub fn shallow_copy(&mut self, rt: &Runtime, object: ObjectId) -> GrtResult<ObjectId> {
        let copy = self.duplicate_object(rt, object, &HashSet::new(), true)?;
        self.copies.push(copy);
        Ok(copy)
    }

    /// The copy corresponding to `object`, when one was produced
    pub fn copy_for_object(&self, rt: &Runtime, object: ObjectId) -> Option<ObjectId> {
        let guid = rt.object_guid(object)?;
        self.object_copies.get(&guid).copied()
    }

    /// Produce a structural copy of `object`.
    ///
    /// Simple members are shared; owned list/dict/object members are
    /// recursively duplicated (unless `dontfollow` forces sharing);
    /// non-owned references are preserved pointing at the original until
    /// the fixup pass substitutes their copies.
    pub fn duplicate_object(
        &mut self,
        rt: &Runtime,
        object: ObjectId,
        skip_members: &HashSet<String>,
        dontfollow: bool,
    ) -> GrtResult<ObjectId> {
        let class = rt
            .object_class_name(object)
            .ok_or_else(|| GrtError::BadItem(format!("invalid object {object}")))?;
        let copy = rt.allocate(&class)?;

        // save the mapping from the original to its copy before descending,
        // so self-references resolve
        if let Some(guid) = rt.object_guid(object) {
            self.object_copies.insert(guid, copy);
        }

        // the owner back-reference is a non-owning reference like any other:
        // carried over as-is, remapped by the fixup pass if its target was
        // also copied
        rt.set_owner(copy, rt.owner(object));

        let mut members: Vec<Member> = Vec::new();
        rt.foreach_member(&class, |m| members.push(m.clone()));

        for member in &members {
            if skip_members.contains(&member.name) || member.calculated {
                continue;
            }
            let value = rt.get_member(object, &member.name)?;
            let member_dontfollow = dontfollow || !member.owned;

            match member.type_.base.type_ {
                Type::List => {
                    if let Value::List(source) = &value {
                        let target = rt.get_member(copy, &member.name)?.as_list()?;
                        self.copy_list(rt, &target, source, member_dontfollow)?;
                    }
                }
                Type::Dict => {
                    if let Value::Dict(source) = &value {
                        let target = rt.get_member(copy, &member.name)?.as_dict()?;
                        self.copy_dict(rt, &target, source, member_dontfollow)?;
                    }
                }
                Type::Object => match &value {
                    Value::Object(target) => {
                        if member_dontfollow {
                            let mapped = self
                                .copy_for_object(rt, *target)
                                .map(Value::Object)
                                .unwrap_or(value.clone());
                            rt.set_member_unchecked(copy, &member.name, mapped)?;
                        } else {
                            let target_copy =
                                self.duplicate_object(rt, *target, &HashSet::new(), false)?;
                            rt.set_member_unchecked(copy, &member.name, Value::Object(target_copy))?;
                        }
                    }
                    _ => {
                        rt.set_member_unchecked(copy, &member.name, Value::Null)?;
                    }
                },
                _ => {
                    rt.set_member_unchecked(copy, &member.name, value)?;
                }
            }
        }

        Ok(copy)
    }

    fn copy_list(
        &mut self,
        rt: &Runtime,
        target: &ListRef,
        source: &ListRef,
        dontfollow: bool,
    ) -> GrtResult<()> {
        for value in source.items() {
            match &value {
                Value::List(nested) => {
                    if dontfollow {
                        target.insert(rt, value)?;
                    } else {
                        let copy = ListRef::new();
                        self.copy_list(rt, &copy, nested, dontfollow)?;
                        target.insert(rt, Value::List(copy))?;
                    }
                }
                Value::Dict(nested) => {
                    if dontfollow {
                        target.insert(rt, value)?;
                    } else {
                        let copy = DictRef::new();
                        self.copy_dict(rt, &copy, nested, dontfollow)?;
                        target.insert(rt, Value::Dict(copy))?;
                    }
                }
                Value::Object(object) => {
                    if dontfollow {
                        target.insert(rt, value)?;
                    } else {
                        let copy = self.copy(rt, *object, &HashSet::new())?;
                        target.insert(rt, Value::Object(copy))?;
                    }
                }
                _ => target.insert(rt, value)?,
            }
        }
        Ok(())
    }

    fn copy_dict(
        &mut self,
        rt: &Runtime,
        target: &DictRef,
        source: &DictRef,
        dontfollow: bool,
    ) -> GrtResult<()> {
        for (key, value) in source.entries() {
            match &value {
                Value::List(nested) => {
                    if dontfollow {
                        target.set(rt, &key, value)?;
                    } else {
                        let copy = ListRef::new();
                        self.copy_list(rt, &copy, nested, dontfollow)?;
                        target.set(rt, &key, Value::List(copy))?;
                    }
                }
                Value::Dict(nested) => {
                    if dontfollow {
                        target.set(rt, &key, value)?;
                    } else {
                        let copy = DictRef::new();
                        self.copy_dict(rt, &copy, nested, dontfollow)?;
                        target.set(rt, &key, Value::Dict(copy))?;
                    }
                }
                Value::Object(object) => {
                    if dontfollow {
                        target.set(rt, &key, value)?;
                    } else {
                        let copy = self.copy(rt, *object, &HashSet::new())?;
                        target.set(rt, &key, Value::Object(copy))?;
                    }
                }
                _ => target.set(rt, &key, value)?,
            }
        }
        Ok(())
    }

    /// Second pass: walk everything that was copied and substitute copied
    /// targets into non-owning object references.
    pub fn update_references(&self, rt: &Runtime) -> GrtResult<()> {
        for copy in &self.copies {
            self.fixup_object_copied_references(rt, *copy)?;
        }
        Ok(())
    }

    fn fixup_object_copied_references(&self, rt: &Runtime, copy: ObjectId) -> GrtResult<()> {
        let class = match rt.object_class_name(copy) {
            Some(class) => class,
            None => return Ok(()),
        };

        // remap the owner back-reference first
        if let Some(owner) = rt.owner(copy) {
            if let Some(mapped) = self.copy_for_object(rt, owner) {
                rt.set_owner(copy, Some(mapped));
            }
        }

        let mut members: Vec<Member> = Vec::new();
        rt.foreach_member(&class, |m| members.push(m.clone()));

        for member in &members {
            let value = rt.get_member(copy, &member.name)?;
            if value.is_null() {
                continue;
            }
            let dontfollow = !member.owned;

            match member.type_.base.type_ {
                Type::List => {
                    let list = value.as_list()?;
                    for (i, item) in list.items().into_iter().enumerate() {
                        if let Value::Object(object) = item {
                            if dontfollow {
                                if let Some(mapped) = self.copy_for_object(rt, object) {
                                    list.set(rt, i, Value::Object(mapped))?;
                                }
                            } else {
                                self.fixup_object_copied_references(rt, object)?;
                            }
                        }
                    }
                }
                Type::Dict => {
                    let dict = value.as_dict()?;
                    for (key, item) in dict.entries() {
                        if let Value::Object(object) = item {
                            if dontfollow {
                                if let Some(mapped) = self.copy_for_object(rt, object) {
                                    dict.set(rt, &key, Value::Object(mapped))?;
                                }
                            } else {
                                self.fixup_object_copied_references(rt, object)?;
                            }
                        }
                    }
                }
                Type::Object => {
                    let object = value.as_object()?;
                    if dontfollow {
                        if let Some(mapped) = self.copy_for_object(rt, object) {
                            rt.set_member_unchecked(copy, &member.name, Value::Object(mapped))?;
                        }
                    } else {
                        self.fixup_object_copied_references(rt, object)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Copy a value.
///
/// A shallow copy of a container shares its nested containers; a deep copy
/// recursively duplicates lists, dicts, and objects (objects through a full
/// copy-then-fixup cycle). Simple values are immutable and returned as-is.
pub fn copy_value(rt: &Runtime, value: &Value, deep: bool) -> GrtResult<Value> {
    match value {
        Value::Null | Value::Integer(_) | Value::Double(_) | Value::String(_) => Ok(value.clone()),
        Value::List(source) => {
            let copy = ListRef::typed(source.content_type().clone(), source.null_allowed());
            for item in source.items() {
                let item = if deep { copy_value(rt, &item, true)? } else { item };
                copy.insert(rt, item)?;
            }
            Ok(Value::List(copy))
        }
        Value::Dict(source) => {
            let copy = DictRef::typed(source.content_type().clone(), true);
            for (key, item) in source.entries() {
                let item = if deep { copy_value(rt, &item, true)? } else { item };
                copy.set(rt, &key, item)?;
            }
            Ok(Value::Dict(copy))
        }
        Value::Object(object) => {
            let mut ctx = CopyContext::new();
            let copy = ctx.copy(rt, *object, &HashSet::new())?;
            ctx.update_references(rt)?;
            Ok(Value::Object(copy))
        }
    }
}

/// Give the owned subtree under `object` fresh guids, `object` itself last.
///
/// Non-owned references are untouched; combined with `update_references`
/// this turns a duplicate into an independent tree with new identities.
pub fn update_ids(rt: &Runtime, object: ObjectId, skip_members: &HashSet<String>) -> GrtResult<()> {
    let class = match rt.object_class_name(object) {
        Some(class) => class,
        None => return Ok(()),
    };

    let mut members: Vec<Member> = Vec::new();
    rt.foreach_member(&class, |m| members.push(m.clone()));

    for member in &members {
        if skip_members.contains(&member.name) || member.calculated || !member.owned {
            continue;
        }
        let value = rt.get_member(object, &member.name)?;
        match value {
            Value::List(list) => {
                for item in list.items() {
                    if let Value::Object(child) = item {
                        update_ids(rt, child, skip_members)?;
                    }
                }
            }
            Value::Dict(dict) => {
                for (_, item) in dict.entries() {
                    if let Value::Object(child) = item {
                        update_ids(rt, child, skip_members)?;
                    }
                }
            }
            Value::Object(child) => {
                update_ids(rt, child, skip_members)?;
            }
            _ => {}
        }
    }

    rt.set_object_guid(object, get_guid());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Member, MetaClassBuilder};
    use crate::runtime::{Runtime, RuntimeOptions};
    use grt_sdk::SimpleTypeSpec;
    use std::sync::Arc;

    fn runtime() -> Arc<Runtime> {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.add_metaclass(
            MetaClassBuilder::new("model.Node")
                .member(Member::string("name"))
                .member(Member::list("children", SimpleTypeSpec::object("model.Node")).owned())
                .member(Member::object("linked", "model.Node"))
                .build(),
        )
        .unwrap();
        rt.end_loading_metaclasses().unwrap();
        rt
    }

    fn node(rt: &Runtime, name: &str) -> ObjectId {
        let id = rt.allocate("model.Node").unwrap();
        rt.set_member(id, "name", Value::from(name)).unwrap();
        id
    }

    #[test]
    fn test_copy_value_shallow_shares_containers() {
        let rt = runtime();
        let inner = ListRef::new();
        inner.insert(&rt, Value::from(1)).unwrap();
        let outer = ListRef::new();
        outer.insert(&rt, Value::List(inner.clone())).unwrap();

        let copy = copy_value(&rt, &Value::List(outer), false)
            .unwrap()
            .as_list()
            .unwrap();

        // mutating the nested list through the copy is observed in the source
        let nested = copy.get(0).unwrap().as_list().unwrap();
        nested.insert(&rt, Value::from(2)).unwrap();
        assert_eq!(inner.count(), 2);
    }

    #[test]
    fn test_copy_value_deep_is_independent() {
        let rt = runtime();
        let inner = ListRef::new();
        inner.insert(&rt, Value::from(1)).unwrap();
        let outer = ListRef::new();
        outer.insert(&rt, Value::List(inner.clone())).unwrap();

        let copy = copy_value(&rt, &Value::List(outer.clone()), true)
            .unwrap()
            .as_list()
            .unwrap();
        let nested = copy.get(0).unwrap().as_list().unwrap();
        nested.insert(&rt, Value::from(2)).unwrap();

        assert_eq!(inner.count(), 1);
        assert_eq!(outer.get(0).unwrap().as_list().unwrap().count(), 1);
        assert_eq!(nested.count(), 2);
    }

    #[test]
    fn test_duplicate_copies_owned_tree() {
        let rt = runtime();
        let parent = node(&rt, "parent");
        let child = node(&rt, "child");
        rt.set_member(child, "owner", Value::Object(parent)).unwrap();
        let children = rt.get_member(parent, "children").unwrap().as_list().unwrap();
        children.insert(&rt, Value::Object(child)).unwrap();

        let mut ctx = CopyContext::new();
        let copy = ctx.copy(&rt, parent, &HashSet::new()).unwrap();
        ctx.update_references(&rt).unwrap();

        assert_ne!(copy, parent);
        assert_eq!(rt.get_string_member(copy, "name").unwrap(), "parent");

        let copied_children = rt.get_member(copy, "children").unwrap().as_list().unwrap();
        assert_eq!(copied_children.count(), 1);
        let child_copy = copied_children.get(0).unwrap().as_object().unwrap();
        assert_ne!(child_copy, child);
        assert_eq!(rt.get_string_member(child_copy, "name").unwrap(), "child");

        // the child copy's owner was remapped to the parent copy
        assert_eq!(rt.owner(child_copy), Some(copy));
        // the source tree is untouched
        assert_eq!(rt.owner(child), Some(parent));
        assert_eq!(children.count(), 1);
        assert_eq!(children.get(0).unwrap().as_object().unwrap(), child);
    }

    #[test]
    fn test_fixup_remaps_internal_back_reference() {
        // A owns B; B carries a non-owning reference back to A. The copy of
        // B must point at the copy of A after fixup, not at the original.
        let rt = runtime();
        let a = node(&rt, "a");
        let b = node(&rt, "b");
        rt.set_member(b, "owner", Value::Object(a)).unwrap();
        rt.get_member(a, "children")
            .unwrap()
            .as_list()
            .unwrap()
            .insert(&rt, Value::Object(b))
            .unwrap();
        rt.set_member(b, "linked", Value::Object(a)).unwrap();

        let mut ctx = CopyContext::new();
        let a_copy = ctx.copy(&rt, a, &HashSet::new()).unwrap();
        ctx.update_references(&rt).unwrap();

        let b_copy = rt
            .get_member(a_copy, "children")
            .unwrap()
            .as_list()
            .unwrap()
            .get(0)
            .unwrap()
            .as_object()
            .unwrap();
        assert_eq!(
            rt.get_member(b_copy, "linked").unwrap(),
            Value::Object(a_copy)
        );
        // the original is untouched
        assert_eq!(rt.get_member(b, "linked").unwrap(), Value::Object(a));
    }

    #[test]
    fn test_reference_to_uncopied_object_is_preserved() {
        let rt = runtime();
        let a = node(&rt, "a");
        let external = node(&rt, "external");
        rt.set_member(a, "linked", Value::Object(external)).unwrap();

        let mut ctx = CopyContext::new();
        let a_copy = ctx.copy(&rt, a, &HashSet::new()).unwrap();
        ctx.update_references(&rt).unwrap();

        // external was not part of the copied graph: the reference still
        // points at the original
        assert_eq!(
            rt.get_member(a_copy, "linked").unwrap(),
            Value::Object(external)
        );
    }

    #[test]
    fn test_skip_members() {
        let rt = runtime();
        let a = node(&rt, "a");
        let mut skip = HashSet::new();
        skip.insert("name".to_string());

        let mut ctx = CopyContext::new();
        let copy = ctx.copy(&rt, a, &skip).unwrap();
        assert_eq!(rt.get_string_member(copy, "name").unwrap(), "");
    }

    #[test]
    fn test_shallow_copy_shares_owned_content() {
        let rt = runtime();
        let parent = node(&rt, "parent");
        let child = node(&rt, "child");
        rt.get_member(parent, "children")
            .unwrap()
            .as_list()
            .unwrap()
            .insert(&rt, Value::Object(child))
            .unwrap();

        let mut ctx = CopyContext::new();
        let copy = ctx.shallow_copy(&rt, parent).unwrap();

        let copied_children = rt.get_member(copy, "children").unwrap().as_list().unwrap();
        assert_eq!(copied_children.count(), 1);
        // same child object, not a duplicate
        assert_eq!(copied_children.get(0).unwrap().as_object().unwrap(), child);
    }

    #[test]
    fn test_update_ids_refreshes_owned_subtree() {
        let rt = runtime();
        let parent = node(&rt, "parent");
        let child = node(&rt, "child");
        let external = node(&rt, "external");
        rt.get_member(parent, "children")
            .unwrap()
            .as_list()
            .unwrap()
            .insert(&rt, Value::Object(child))
            .unwrap();
        rt.set_member(parent, "linked", Value::Object(external)).unwrap();

        let old_parent_guid = rt.object_guid(parent).unwrap();
        let old_child_guid = rt.object_guid(child).unwrap();
        let old_external_guid = rt.object_guid(external).unwrap();

        update_ids(&rt, parent, &HashSet::new()).unwrap();

        assert_ne!(rt.object_guid(parent).unwrap(), old_parent_guid);
        assert_ne!(rt.object_guid(child).unwrap(), old_child_guid);
        // non-owned references keep their identity
        assert_eq!(rt.object_guid(external).unwrap(), old_external_guid);
    }
}
