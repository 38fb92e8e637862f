//! End-to-end tests for the reflective object tree: metaclass loading from
//! definition files, allocation, owner validation, path navigation, and
//! duplication with reference fixup.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use grt_engine::{
    copy_value, find_child_object, update_ids, validate_tree_structure, CopyContext, DictRef,
    ListRef, Runtime, RuntimeOptions, Value,
};

const DB_STRUCTS: &str = r#"[
  {
    "name": "db.DatabaseObject",
    "members": [
      { "name": "name", "type": "string",
        "attributes": { "desc": "object name" } },
      { "name": "comment", "type": "string" }
    ]
  },
  {
    "name": "db.Column",
    "parent": "db.DatabaseObject",
    "members": [
      { "name": "columnType", "type": "string" }
    ]
  },
  {
    "name": "db.Table",
    "parent": "db.DatabaseObject",
    "members": [
      { "name": "columns", "type": "list",
        "content-type": "object", "content-class": "db.Column",
        "owned": true },
      { "name": "primaryKeyColumn", "type": "object", "class": "db.Column" }
    ]
  },
  {
    "name": "db.Schema",
    "parent": "db.DatabaseObject",
    "members": [
      { "name": "tables", "type": "list",
        "content-type": "object", "content-class": "db.Table",
        "owned": true }
    ]
  }
]"#;

fn runtime_with_structs() -> Arc<Runtime> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("structs.db.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(DB_STRUCTS.as_bytes()).unwrap();

    let rt = Runtime::new(RuntimeOptions::default());
    let count = rt.scan_metaclasses_in(dir.path()).unwrap();
    assert_eq!(count, 4);
    rt.end_loading_metaclasses().unwrap();
    rt
}

fn named(rt: &Runtime, class: &str, name: &str) -> grt_engine::ObjectId {
    let id = rt.allocate(class).unwrap();
    rt.set_member(id, "name", Value::from(name)).unwrap();
    id
}

#[test]
fn test_structs_loaded_with_attributes_and_inheritance() {
    let rt = runtime_with_structs();

    // inherited member resolution
    assert!(rt.member_info("db.Table", "name").is_some());
    assert!(rt.member_info("db.Table", "columns").is_some());
    assert!(rt.is_a("db.Table", "db.DatabaseObject"));
    assert!(rt.is_a("db.Table", "Object"));

    // member attribute lookup walks the chain
    assert_eq!(
        rt.member_attribute("db.Table", "name", "desc").as_deref(),
        Some("object name")
    );
}

#[test]
fn test_owner_scenario_from_registration_to_corruption() {
    let rt = runtime_with_structs();

    // register class, allocate a table, insert a column with its owner set
    let table = named(&rt, "db.Table", "customers");
    let column = named(&rt, "db.Column", "id");
    rt.set_member(column, "owner", Value::Object(table)).unwrap();

    let columns = rt.get_member(table, "columns").unwrap().as_list().unwrap();
    columns.insert(&rt, Value::Object(column)).unwrap();
    assert!(validate_tree_structure(&rt, table));

    // simulate corruption: point the owner at an unrelated object
    let other = named(&rt, "db.Table", "other");
    rt.set_member(column, "owner", Value::Object(other)).unwrap();
    assert!(!validate_tree_structure(&rt, table));
}

#[test]
fn test_typed_list_insert_failure_leaves_list_unchanged() {
    let rt = runtime_with_structs();
    let table = named(&rt, "db.Table", "t");
    let column = named(&rt, "db.Column", "c");
    let schema = named(&rt, "db.Schema", "s");

    let columns = rt.get_member(table, "columns").unwrap().as_list().unwrap();
    columns.insert(&rt, Value::Object(column)).unwrap();

    // a schema is not a db.Column
    assert!(columns.insert(&rt, Value::Object(schema)).is_err());
    assert!(columns.insert(&rt, Value::from("not an object")).is_err());
    assert_eq!(columns.count(), 1);
    assert_eq!(columns.get(0).unwrap(), Value::Object(column));
}

/// Build one schema with two tables under a dict root and install it as
/// the runtime's root tree.
fn build_catalog(rt: &Arc<Runtime>) -> (grt_engine::ObjectId, grt_engine::ObjectId) {
    let schema = named(rt, "db.Schema", "mydb");
    let tables = rt.get_member(schema, "tables").unwrap().as_list().unwrap();

    let customers = named(rt, "db.Table", "customers");
    let orders = named(rt, "db.Table", "orders");
    for table in [customers, orders] {
        rt.set_member(table, "owner", Value::Object(schema)).unwrap();
        tables.insert(rt, Value::Object(table)).unwrap();
    }

    let schemata = ListRef::new();
    schemata.insert(rt, Value::Object(schema)).unwrap();
    let root = DictRef::new();
    root.set(rt, "schemata", Value::List(schemata)).unwrap();
    rt.set_root(Value::Dict(root));
    (customers, orders)
}

#[test]
fn test_path_navigation_over_catalog() {
    let rt = runtime_with_structs();
    let (_customers, _orders) = build_catalog(&rt);

    let name = rt.get("/schemata/0/tables/1/name").unwrap();
    assert_eq!(name, Value::from("orders"));

    // out-of-range index fails, in-range succeeds
    assert!(rt.get("/schemata/0/tables/2/name").is_none());
    assert!(rt.get("/schemata/0/tables/1").is_some());

    // list segments match objects by name too
    let name = rt.get("/schemata/mydb/tables/customers/name").unwrap();
    assert_eq!(name, Value::from("customers"));

    // set through a path
    rt.set("/schemata/0/tables/0/comment", Value::from("main table"))
        .unwrap();
    assert_eq!(
        rt.get("/schemata/0/tables/0/comment").unwrap(),
        Value::from("main table")
    );
    assert!(rt.set("/schemata/0/bogus/1", Value::Null).is_err());
}

#[test]
fn test_find_object_by_id_with_cache() {
    let rt = runtime_with_structs();
    let (customers, _) = build_catalog(&rt);
    let guid = rt.object_guid(customers).unwrap();

    assert_eq!(rt.find_object_by_id(&guid, "/"), Some(customers));
    // cached second lookup
    assert_eq!(rt.find_object_by_id(&guid, "/"), Some(customers));
    assert_eq!(rt.find_object_by_id("missing-guid", "/"), None);

    let root = rt.root();
    assert_eq!(find_child_object(&rt, &root, &guid, true), Some(customers));
}

#[test]
fn test_duplicate_with_backreference_and_update_ids() {
    let rt = runtime_with_structs();

    // table owns a column; the table also carries a non-owning reference
    // to that same column (primary key)
    let table = named(&rt, "db.Table", "t");
    let column = named(&rt, "db.Column", "id");
    rt.set_member(column, "owner", Value::Object(table)).unwrap();
    rt.get_member(table, "columns")
        .unwrap()
        .as_list()
        .unwrap()
        .insert(&rt, Value::Object(column))
        .unwrap();
    rt.set_member(table, "primaryKeyColumn", Value::Object(column))
        .unwrap();

    let mut ctx = CopyContext::new();
    let copy = ctx.copy(&rt, table, &HashSet::new()).unwrap();
    ctx.update_references(&rt).unwrap();

    let column_copy = rt
        .get_member(copy, "columns")
        .unwrap()
        .as_list()
        .unwrap()
        .get(0)
        .unwrap()
        .as_object()
        .unwrap();
    assert_ne!(column_copy, column);

    // the non-owning reference points at the copied column, not the original
    assert_eq!(
        rt.get_member(copy, "primaryKeyColumn").unwrap(),
        Value::Object(column_copy)
    );
    // and the copied column's owner is the copied table
    assert_eq!(rt.owner(column_copy), Some(copy));
    assert!(validate_tree_structure(&rt, copy));

    // fresh identities for the duplicate
    update_ids(&rt, copy, &HashSet::new()).unwrap();
    assert_ne!(rt.object_guid(copy), rt.object_guid(table));
    assert_ne!(rt.object_guid(column_copy), rt.object_guid(column));

    // original tree untouched throughout
    assert_eq!(
        rt.get_member(table, "primaryKeyColumn").unwrap(),
        Value::Object(column)
    );
    assert!(validate_tree_structure(&rt, table));
}

#[test]
fn test_copy_value_independence_matrix() {
    let rt = runtime_with_structs();
    let table = named(&rt, "db.Table", "t");

    // deep copy of an object-bearing list must not alias the source
    let list = ListRef::new();
    list.insert(&rt, Value::Object(table)).unwrap();
    let deep = copy_value(&rt, &Value::List(list.clone()), true)
        .unwrap()
        .as_list()
        .unwrap();
    let table_copy = deep.get(0).unwrap().as_object().unwrap();
    assert_ne!(table_copy, table);
    rt.set_member(table_copy, "name", Value::from("changed")).unwrap();
    assert_eq!(rt.get_string_member(table, "name").unwrap(), "t");

    // shallow copy shares the object reference
    let shallow = copy_value(&rt, &Value::List(list), false)
        .unwrap()
        .as_list()
        .unwrap();
    assert_eq!(shallow.get(0).unwrap(), Value::Object(table));
}
