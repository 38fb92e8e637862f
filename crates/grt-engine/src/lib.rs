//! GRT Engine - reflective value/object runtime
//!
//! This crate provides the complete GRT runtime:
//! - **Value model**: tagged values over integers, doubles, strings, lists,
//!   dicts, and object references (`value` module)
//! - **Reflection**: metaclass registry describing object classes, their
//!   members and methods (`reflect` module)
//! - **Object space**: arena-backed object instances with owner
//!   back-references forming a tree (`object` module)
//! - **Graph operations**: deep/shallow copy with two-pass reference fixup,
//!   tree validation, path navigation, list merging (`copy`, `tree`, `path`)
//! - **Module system**: uniformly callable, type-checked functions loaded by
//!   pluggable per-language loaders (`module` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use grt_engine::{Runtime, RuntimeOptions, Value};
//!
//! let rt = Runtime::new(RuntimeOptions::default());
//! rt.scan_metaclasses_in("res/structs")?;
//! rt.end_loading_metaclasses()?;
//!
//! let table = rt.allocate("db.Table")?;
//! rt.set_member(table, "name", Value::from("customers"))?;
//! ```

#![warn(rust_2018_idioms)]

pub mod convert;
pub mod copy;
pub mod interp;
pub mod module;
pub mod object;
pub mod path;
pub mod reflect;
pub mod runtime;
pub mod timer;
pub mod tree;
pub mod value;

// Re-export SDK types (canonical definitions live in grt-sdk)
pub use grt_sdk::{ArgSpec, FunctionSignature, GrtError, GrtResult, ModuleInfo, SimpleTypeSpec, Type, TypeSpec};

pub use convert::{FromGrt, ToGrt};
pub use copy::{copy_value, update_ids, CopyContext};
pub use interp::{InterpreterGate, ScopedInterpreterLock};
pub use module::native::{NativeModuleBuilder, NativeModuleLoader, NativeModuleRegistry};
pub use module::{Function, Interface, Module, ModuleLoader};
pub use object::{ChangeEvent, ObjectId};
pub use path::{get_value_by_path, set_value_by_path};
pub use reflect::{Member, MetaClass, MetaClassBuilder, Method, MethodImpl};
pub use runtime::{Message, MessageKind, Runtime, RuntimeOptions};
pub use timer::TimerActionThread;
pub use tree::{
    append_contents, find_child_object, merge_contents_by_id, merge_contents_by_name,
    merge_dict_contents, replace_contents, validate_tree_structure,
};
pub use value::{DictRef, ListRef, Value};

/// Generate a fresh globally-unique object identifier.
///
/// Canonical hyphenated UUID form, 36 characters (well under the 50-char
/// cap the serialized format allows).
pub fn get_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}
