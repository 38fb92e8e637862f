//! Object tree operations
//!
//! The object graph is a tree by convention: every owned child's `owner`
//! back-reference must point at its structural parent.
//! [`validate_tree_structure`] checks that invariant exhaustively, logging
//! every violation it finds - silent owner corruption is the failure mode
//! this pass exists to surface. The search and merge helpers tolerate
//! accidental cycles defensively via visited sets.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use grt_sdk::{GrtResult, Type};

use crate::object::ObjectId;
use crate::reflect::Member;
use crate::runtime::Runtime;
use crate::value::{DictRef, ListRef, Value};

/// Identity key for the visited set: containers by pointer, objects by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VisitKey {
    List(usize),
    Dict(usize),
    Object(ObjectId),
}

fn owned_members(rt: &Runtime, object: ObjectId) -> Vec<Member> {
    let mut members = Vec::new();
    if let Some(class) = rt.object_class_name(object) {
        rt.foreach_member(&class, |m| {
            if !m.calculated {
                members.push(m.clone());
            }
        });
    }
    members
}

/// Check that every owned descendant of `root` has its `owner`
/// back-reference pointing at its structural parent.
///
/// All violations are logged (parent, member, position, found owner); the
/// walk continues past them so a single run reports every problem. Returns
/// true only when the whole tree is consistent.
pub fn validate_tree_structure(rt: &Runtime, root: ObjectId) -> bool {
    let mut visited = HashSet::new();
    validate_object(rt, root, &mut visited)
}

fn validate_object(rt: &Runtime, object: ObjectId, visited: &mut HashSet<ObjectId>) -> bool {
    if !visited.insert(object) {
        return true;
    }
    let mut ok = true;

    for member in owned_members(rt, object) {
        if !member.owned {
            continue;
        }
        let value = match rt.get_member(object, &member.name) {
            Ok(value) => value,
            Err(_) => continue,
        };
        match value {
            Value::Object(child) => {
                ok &= check_owner(rt, object, &member.name, None, child, visited);
            }
            Value::List(list) => {
                for (index, item) in list.items().into_iter().enumerate() {
                    if let Value::Object(child) = item {
                        ok &= check_owner(
                            rt,
                            object,
                            &member.name,
                            Some(index.to_string()),
                            child,
                            visited,
                        );
                    }
                }
            }
            Value::Dict(dict) => {
                for (key, item) in dict.entries() {
                    if let Value::Object(child) = item {
                        ok &= check_owner(rt, object, &member.name, Some(key), child, visited);
                    }
                }
            }
            _ => {}
        }
    }
    ok
}

fn check_owner(
    rt: &Runtime,
    parent: ObjectId,
    member: &str,
    position: Option<String>,
    child: ObjectId,
    visited: &mut HashSet<ObjectId>,
) -> bool {
    let mut ok = true;
    if rt.owner(child) != Some(parent) {
        let found = rt
            .owner(child)
            .and_then(|o| rt.object_guid(o))
            .unwrap_or_else(|| "null".to_string());
        tracing::warn!(
            parent = %rt.object_guid(parent).unwrap_or_default(),
            parent_class = %rt.object_class_name(parent).unwrap_or_default(),
            member = %member,
            position = %position.as_deref().unwrap_or("-"),
            child = %rt.object_guid(child).unwrap_or_default(),
            found_owner = %found,
            "owned object's owner does not point back at its structural parent"
        );
        ok = false;
    }
    ok & validate_object(rt, child, visited)
}

/// Depth-first search for an object with the given guid starting from any
/// object, list, or dict value.
///
/// Direct object children are matched even when `recursive` is false; the
/// `owner` back-reference is never followed. Cycles are tolerated through
/// an identity-keyed visited set.
pub fn find_child_object(
    rt: &Runtime,
    start: &Value,
    guid: &str,
    recursive: bool,
) -> Option<ObjectId> {
    let mut visited = HashSet::new();
    match start {
        Value::Object(object) => find_in_object(rt, *object, guid, recursive, &mut visited),
        Value::List(list) => find_in_list(rt, list, guid, recursive, &mut visited),
        Value::Dict(dict) => find_in_dict(rt, dict, guid, recursive, &mut visited),
        _ => None,
    }
}

fn find_in_list(
    rt: &Runtime,
    list: &ListRef,
    guid: &str,
    recursive: bool,
    visited: &mut HashSet<VisitKey>,
) -> Option<ObjectId> {
    if !visited.insert(VisitKey::List(list.identity())) {
        return None;
    }
    for value in list.items() {
        match value {
            Value::Object(object) => {
                if rt.object_guid(object).as_deref() == Some(guid) {
                    return Some(object);
                }
                if recursive {
                    if let Some(found) = find_in_object(rt, object, guid, recursive, visited) {
                        return Some(found);
                    }
                }
            }
            Value::List(nested) if recursive => {
                if let Some(found) = find_in_list(rt, &nested, guid, recursive, visited) {
                    return Some(found);
                }
            }
            Value::Dict(nested) if recursive => {
                if let Some(found) = find_in_dict(rt, &nested, guid, recursive, visited) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

fn find_in_dict(
    rt: &Runtime,
    dict: &DictRef,
    guid: &str,
    recursive: bool,
    visited: &mut HashSet<VisitKey>,
) -> Option<ObjectId> {
    if !visited.insert(VisitKey::Dict(dict.identity())) {
        return None;
    }
    for (_, value) in dict.entries() {
        match value {
            Value::Object(object) => {
                if rt.object_guid(object).as_deref() == Some(guid) {
                    return Some(object);
                }
                if recursive {
                    if let Some(found) = find_in_object(rt, object, guid, recursive, visited) {
                        return Some(found);
                    }
                }
            }
            Value::List(nested) if recursive => {
                if let Some(found) = find_in_list(rt, &nested, guid, recursive, visited) {
                    return Some(found);
                }
            }
            Value::Dict(nested) if recursive => {
                if let Some(found) = find_in_dict(rt, &nested, guid, recursive, visited) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

fn find_in_object(
    rt: &Runtime,
    object: ObjectId,
    guid: &str,
    recursive: bool,
    visited: &mut HashSet<VisitKey>,
) -> Option<ObjectId> {
    if !visited.insert(VisitKey::Object(object)) {
        return None;
    }
    if rt.object_guid(object).as_deref() == Some(guid) {
        return Some(object);
    }

    for member in owned_members(rt, object) {
        let value = match rt.get_member(object, &member.name) {
            Ok(value) => value,
            Err(_) => continue,
        };
        match value {
            Value::List(list) => {
                if recursive && !list.content_type().type_.is_simple() {
                    if let Some(found) = find_in_list(rt, &list, guid, recursive, visited) {
                        return Some(found);
                    }
                }
            }
            Value::Dict(dict) => {
                if recursive && !dict.content_type().type_.is_simple() {
                    if let Some(found) = find_in_dict(rt, &dict, guid, recursive, visited) {
                        return Some(found);
                    }
                }
            }
            Value::Object(child) => {
                if rt.object_guid(child).as_deref() == Some(guid) {
                    return Some(child);
                }
                if recursive {
                    if let Some(found) = find_in_object(rt, child, guid, recursive, visited) {
                        return Some(found);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Append every item of `source` to `target`
pub fn append_contents(rt: &Runtime, target: &ListRef, source: &ListRef) -> GrtResult<()> {
    for value in source.items() {
        target.insert(rt, value)?;
    }
    Ok(())
}

/// Replace the contents of `target` with the items of `source`
pub fn replace_contents(rt: &Runtime, target: &ListRef, source: &ListRef) -> GrtResult<()> {
    while target.count() > 0 {
        target.remove(rt, 0)?;
    }
    append_contents(rt, target, source)
}

/// Upsert-style merge of object lists matched by the `name` member.
///
/// Items of `source` whose name already appears in `target` replace the
/// existing item when `replace_matching` is set (and are dropped
/// otherwise); new items are appended. The relative order of pre-existing
/// `target` items is preserved.
pub fn merge_contents_by_name(
    rt: &Runtime,
    target: &ListRef,
    source: &ListRef,
    replace_matching: bool,
) -> GrtResult<()> {
    let mut known: FxHashMap<String, usize> = FxHashMap::default();
    for (i, value) in target.items().into_iter().enumerate() {
        if let Value::Object(object) = value {
            known.insert(rt.get_string_member(object, "name")?, i);
        }
    }
    for value in source.items() {
        let object = value.as_object()?;
        let name = rt.get_string_member(object, "name")?;
        match known.get(&name) {
            Some(index) => {
                if replace_matching {
                    target.set(rt, *index, value)?;
                }
            }
            None => target.insert(rt, value)?,
        }
    }
    Ok(())
}

/// Upsert-style merge of object lists matched by object identity (guid)
pub fn merge_contents_by_id(
    rt: &Runtime,
    target: &ListRef,
    source: &ListRef,
    replace_matching: bool,
) -> GrtResult<()> {
    let mut known: FxHashMap<String, usize> = FxHashMap::default();
    for (i, value) in target.items().into_iter().enumerate() {
        if let Value::Object(object) = value {
            if let Some(guid) = rt.object_guid(object) {
                known.insert(guid, i);
            }
        }
    }
    for value in source.items() {
        let object = value.as_object()?;
        let guid = rt.object_guid(object).unwrap_or_default();
        match known.get(&guid) {
            Some(index) => {
                if replace_matching {
                    target.set(rt, *index, value)?;
                }
            }
            None => target.insert(rt, value)?,
        }
    }
    Ok(())
}

/// Merge `source` entries into `target`; existing keys are kept unless
/// `overwrite` is set.
pub fn merge_dict_contents(
    rt: &Runtime,
    target: &DictRef,
    source: &DictRef,
    overwrite: bool,
) -> GrtResult<()> {
    for (key, value) in source.entries() {
        if !overwrite && target.has_key(&key) {
            continue;
        }
        target.set(rt, &key, value)?;
    }
    Ok(())
}
