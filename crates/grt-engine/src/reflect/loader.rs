//! Metaclass definition files
//!
//! Class definitions load from JSON files (conventionally named
//! `structs.<group>.json`), each containing an array of class definitions:
//!
//! ```json
//! [
//!   {
//!     "name": "db.Table",
//!     "parent": "db.DatabaseObject",
//!     "members": [
//!       { "name": "name", "type": "string", "attributes": { "desc": "table name" } },
//!       { "name": "columns", "type": "list",
//!         "content-type": "object", "content-class": "db.Column", "owned": true }
//!     ],
//!     "methods": [
//!       { "name": "columnCount", "return": "int", "arguments": [] }
//!     ]
//!   }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use grt_sdk::{ArgSpec, GrtError, GrtResult, SimpleTypeSpec, Type, TypeSpec};

use super::{Member, MetaClass, Method, ROOT_CLASS_NAME};

#[derive(Debug, Deserialize)]
struct ClassDef {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    members: Vec<MemberDef>,
    #[serde(default)]
    methods: Vec<MethodDef>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MemberDef {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default, rename = "class")]
    object_class: Option<String>,
    #[serde(default, rename = "content-type")]
    content_type: Option<String>,
    #[serde(default, rename = "content-class")]
    content_class: Option<String>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default, rename = "read-only")]
    read_only: bool,
    #[serde(default)]
    owned: bool,
    #[serde(default)]
    calculated: bool,
    #[serde(default = "default_true", rename = "allow-null")]
    allow_null: bool,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MethodDef {
    name: String,
    #[serde(default, rename = "return")]
    return_type: Option<TypeDef>,
    #[serde(default)]
    arguments: Vec<ArgDef>,
    #[serde(default, rename = "abstract")]
    abstract_: bool,
}

#[derive(Debug, Deserialize)]
struct ArgDef {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default, rename = "class")]
    object_class: Option<String>,
    #[serde(default, rename = "content-type")]
    content_type: Option<String>,
    #[serde(default, rename = "content-class")]
    content_class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeDef {
    Tag(String),
    Full {
        #[serde(rename = "type")]
        type_: String,
        #[serde(default, rename = "class")]
        object_class: Option<String>,
        #[serde(default, rename = "content-type")]
        content_type: Option<String>,
        #[serde(default, rename = "content-class")]
        content_class: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

fn build_type_spec(
    class_name: &str,
    member_name: &str,
    tag: &str,
    object_class: Option<&str>,
    content_type: Option<&str>,
    content_class: Option<&str>,
) -> GrtResult<TypeSpec> {
    let base_type = Type::from_tag(tag);
    if base_type == Type::Any && tag != "any" && !tag.is_empty() {
        return Err(GrtError::runtime(format!(
            "Unknown type '{tag}' in {class_name}::{member_name}"
        )));
    }
    let mut spec = TypeSpec::of(base_type);

    match base_type {
        Type::Object => {
            let class = object_class.unwrap_or("");
            if class.is_empty() {
                tracing::warn!(
                    class = class_name,
                    member = member_name,
                    "object member without a class name"
                );
            }
            spec.base.object_class = class.to_string();
        }
        Type::List | Type::Dict => {
            if let Some(ct) = content_type {
                let content = Type::from_tag(ct);
                if content == Type::Any && ct != "any" {
                    return Err(GrtError::runtime(format!(
                        "Unknown content-type '{ct}' in {class_name}::{member_name}"
                    )));
                }
                spec.content = SimpleTypeSpec::of(content);
            }
            if let Some(cc) = content_class {
                spec.content.type_ = Type::Object;
                spec.content.object_class = cc.to_string();
            }
        }
        _ => {}
    }
    Ok(spec)
}

fn build_member(class_name: &str, def: &MemberDef) -> GrtResult<Member> {
    let type_ = build_type_spec(
        class_name,
        &def.name,
        &def.type_,
        def.object_class.as_deref(),
        def.content_type.as_deref(),
        def.content_class.as_deref(),
    )?;

    if def.owned && !type_.base.type_.is_container() && type_.base.type_ != Type::Object {
        tracing::warn!(
            class = class_name,
            member = %def.name,
            "member marked 'owned' but is not an object or container"
        );
    }

    let mut member = Member::new(def.name.clone(), type_);
    member.default_value = def.default.clone().unwrap_or_default();
    member.read_only = member.read_only || def.read_only;
    member.owned = def.owned;
    member.calculated = def.calculated;
    member.allow_null = def.allow_null;
    Ok(member)
}

fn build_method(class_name: &str, def: &MethodDef) -> GrtResult<Method> {
    let ret_type = match &def.return_type {
        None => TypeSpec::default(),
        Some(TypeDef::Tag(tag)) if tag == "void" => TypeSpec::default(),
        Some(TypeDef::Tag(tag)) => build_type_spec(class_name, &def.name, tag, None, None, None)?,
        Some(TypeDef::Full {
            type_,
            object_class,
            content_type,
            content_class,
        }) => build_type_spec(
            class_name,
            &def.name,
            type_,
            object_class.as_deref(),
            content_type.as_deref(),
            content_class.as_deref(),
        )?,
    };

    let mut arg_types = Vec::new();
    for arg in &def.arguments {
        arg_types.push(ArgSpec {
            name: arg.name.clone(),
            type_: build_type_spec(
                class_name,
                &def.name,
                &arg.type_,
                arg.object_class.as_deref(),
                arg.content_type.as_deref(),
                arg.content_class.as_deref(),
            )?,
        });
    }

    let mut method = Method::new(def.name.clone(), ret_type, arg_types);
    method.abstract_ = def.abstract_;
    Ok(method)
}

/// Load all class definitions from one JSON file.
///
/// The returned classes still need to be registered and the registry's
/// loading phase ended before they can be allocated.
pub fn load_metaclass_defs(path: &Path) -> GrtResult<Vec<MetaClass>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| GrtError::os(format!("reading {}", path.display()), &e))?;
    let defs: Vec<ClassDef> = serde_json::from_str(&data).map_err(|e| {
        GrtError::runtime(format!(
            "Error loading structs from {}: {e}",
            path.display()
        ))
    })?;

    let source = path.display().to_string();
    let mut classes = Vec::new();
    for def in &defs {
        if def.name.is_empty() {
            return Err(GrtError::runtime(format!(
                "Class definition without a name in {source}"
            )));
        }
        let mut members = std::collections::BTreeMap::new();
        let mut attributes = rustc_hash::FxHashMap::default();
        for (k, v) in &def.attributes {
            attributes.insert(k.clone(), v.clone());
        }
        for mdef in &def.members {
            let member = build_member(&def.name, mdef)?;
            for (k, v) in &mdef.attributes {
                attributes.insert(format!("{}:{}", mdef.name, k), v.clone());
            }
            members.insert(member.name.clone(), member);
        }
        let mut methods = std::collections::BTreeMap::new();
        for mdef in &def.methods {
            let method = build_method(&def.name, mdef)?;
            methods.insert(method.name.clone(), method);
        }

        classes.push(MetaClass {
            name: def.name.clone(),
            parent: Some(
                def.parent
                    .clone()
                    .unwrap_or_else(|| ROOT_CLASS_NAME.to_string()),
            ),
            placeholder: false,
            source: source.clone(),
            members,
            methods,
            attributes,
        });
    }
    Ok(classes)
}
