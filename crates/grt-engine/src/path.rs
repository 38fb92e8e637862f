//! Slash-separated path navigation over nested dict/list/object structures
//!
//! Dict and object segments are key/member lookups; list segments are
//! parsed as integer indexes or, failing that, matched against the `name`
//! member of object elements. Navigation never panics or errors: a missing
//! segment yields `None` (or false for sets), with the failing segment
//! logged so callers can diagnose.

use grt_sdk::GrtResult;

use crate::runtime::Runtime;
use crate::value::{ListRef, Value};

fn list_element(rt: &Runtime, list: &ListRef, segment: &str) -> Option<Value> {
    if let Ok(index) = segment.parse::<usize>() {
        return list.get(index).ok();
    }
    // match by the `name` member of object elements
    for value in list.items() {
        if let Value::Object(object) = &value {
            if let Ok(name) = rt.get_string_member(*object, "name") {
                if name == segment {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Traverse `root` along a `/`-separated path and return the value found.
///
/// Returns `None` on any missing path segment, logging the failing
/// segment - never an error.
pub fn get_value_by_path(rt: &Runtime, root: &Value, path: &str) -> Option<Value> {
    if path == "/" || path.is_empty() {
        return Some(root.clone());
    }

    // tolerate doubled slashes from sloppy concatenation
    let normalized = path.trim_start_matches('/').replace("//", "/");
    let mut value = root.clone();

    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        let next = match &value {
            Value::Dict(dict) => dict.get_opt(segment),
            Value::List(list) => list_element(rt, list, segment),
            Value::Object(object) => rt.get_member(*object, segment).ok().filter(|v| !v.is_null()),
            _ => None,
        };
        match next {
            Some(next) => value = next,
            None => {
                tracing::error!(segment = %segment, path = %path, "invalid path element");
                return None;
            }
        }
    }
    Some(value)
}

/// Navigate to the parent of the path's last segment and assign `value`
/// there (dict key, object member, or list index).
///
/// Returns false when any path component is missing or the final container
/// cannot accept the assignment; failures are logged, never raised.
pub fn set_value_by_path(rt: &Runtime, root: &Value, path: &str, value: Value) -> bool {
    if path == "/" || !path.contains('/') {
        return false;
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let (front, last) = match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => return false,
    };
    if last.is_empty() {
        return false;
    }

    let container = match get_value_by_path(rt, root, front) {
        Some(container) => container,
        None => return false,
    };

    let result: GrtResult<()> = match &container {
        Value::Dict(dict) => dict.set(rt, last, value),
        Value::Object(object) => rt.set_member(*object, last, value),
        Value::List(list) => match last.parse::<usize>() {
            Ok(index) if index < list.count() => list.set(rt, index, value),
            _ => return false,
        },
        _ => return false,
    };

    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(path = %path, error = %err, "cannot set value at path");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Member, MetaClassBuilder};
    use crate::runtime::{Runtime, RuntimeOptions};
    use crate::value::DictRef;
    use grt_sdk::SimpleTypeSpec;
    use std::sync::Arc;

    /// One schema holding two tables, rooted in a dict under "schemata".
    fn schema_fixture() -> (Arc<Runtime>, Value) {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.add_metaclass(
            MetaClassBuilder::new("db.Table")
                .member(Member::string("name"))
                .build(),
        )
        .unwrap();
        rt.add_metaclass(
            MetaClassBuilder::new("db.Schema")
                .member(Member::string("name"))
                .member(Member::list("tables", SimpleTypeSpec::object("db.Table")).owned())
                .build(),
        )
        .unwrap();
        rt.end_loading_metaclasses().unwrap();

        let schema = rt.allocate("db.Schema").unwrap();
        rt.set_member(schema, "name", Value::from("mydb")).unwrap();
        let tables = rt.get_member(schema, "tables").unwrap().as_list().unwrap();
        for name in ["customers", "orders"] {
            let table = rt.allocate("db.Table").unwrap();
            rt.set_member(table, "name", Value::from(name)).unwrap();
            tables.insert(&rt, Value::Object(table)).unwrap();
        }

        let schemata = ListRef::new();
        schemata.insert(&rt, Value::Object(schema)).unwrap();
        let root = DictRef::new();
        root.set(&rt, "schemata", Value::List(schemata)).unwrap();
        (rt, Value::Dict(root))
    }

    #[test]
    fn test_get_by_path() {
        let (rt, root) = schema_fixture();

        let name = get_value_by_path(&rt, &root, "/schemata/0/tables/1/name").unwrap();
        assert_eq!(name, Value::from("orders"));

        let name = get_value_by_path(&rt, &root, "/schemata/0/name").unwrap();
        assert_eq!(name, Value::from("mydb"));
    }

    #[test]
    fn test_get_root_path() {
        let (rt, root) = schema_fixture();
        assert_eq!(get_value_by_path(&rt, &root, "/").unwrap(), root);
    }

    #[test]
    fn test_get_by_path_out_of_range_index() {
        let (rt, root) = schema_fixture();
        assert!(get_value_by_path(&rt, &root, "/schemata/0/tables/5/name").is_none());
        assert!(get_value_by_path(&rt, &root, "/schemata/9").is_none());
    }

    #[test]
    fn test_get_by_path_missing_key() {
        let (rt, root) = schema_fixture();
        assert!(get_value_by_path(&rt, &root, "/nothing/here").is_none());
        assert!(get_value_by_path(&rt, &root, "/schemata/0/bogus").is_none());
    }

    #[test]
    fn test_list_segment_matched_by_name() {
        let (rt, root) = schema_fixture();
        let name = get_value_by_path(&rt, &root, "/schemata/mydb/tables/customers/name").unwrap();
        assert_eq!(name, Value::from("customers"));
    }

    #[test]
    fn test_doubled_slashes_tolerated() {
        let (rt, root) = schema_fixture();
        let name = get_value_by_path(&rt, &root, "/schemata//0/name").unwrap();
        assert_eq!(name, Value::from("mydb"));
    }

    #[test]
    fn test_set_by_path() {
        let (rt, root) = schema_fixture();

        assert!(set_value_by_path(
            &rt,
            &root,
            "/schemata/0/tables/0/name",
            Value::from("clients")
        ));
        assert_eq!(
            get_value_by_path(&rt, &root, "/schemata/0/tables/0/name").unwrap(),
            Value::from("clients")
        );

        // dict key set at the root
        assert!(set_value_by_path(&rt, &root, "/comment", Value::from("hi")));
        assert_eq!(
            get_value_by_path(&rt, &root, "/comment").unwrap(),
            Value::from("hi")
        );
    }

    #[test]
    fn test_set_by_path_failures() {
        let (rt, root) = schema_fixture();
        // missing intermediate segment
        assert!(!set_value_by_path(&rt, &root, "/missing/x", Value::from(1)));
        // out-of-range list index
        assert!(!set_value_by_path(
            &rt,
            &root,
            "/schemata/0/tables/9",
            Value::from(1)
        ));
        // type error surfaces as false, not a panic
        assert!(!set_value_by_path(
            &rt,
            &root,
            "/schemata/0/tables/0/name",
            Value::from(42)
        ));
        // root itself cannot be assigned
        assert!(!set_value_by_path(&rt, &root, "/", Value::from(1)));
    }
}
