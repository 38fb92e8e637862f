//! MetaClass reflection registry
//!
//! A [`MetaClass`] describes one registered object class: its parent (single
//! inheritance), its members (name, type spec, attributes such as
//! `read-only`, `owned`, `desc`) and its methods. Metaclasses are loaded
//! once at startup - from `structs.*.json` definition files or through
//! [`MetaClassBuilder`] - and are immutable afterwards.
//!
//! Member names iterate in sorted order, so traversals (copy, validation,
//! fixup) are deterministic.

mod loader;

pub use loader::load_metaclass_defs;

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use grt_sdk::{ArgSpec, GrtError, GrtResult, Type, TypeSpec};

use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::{ListRef, Value};

/// Implementation of a metaclass method, bound before the registry freezes
pub type MethodImpl = Arc<dyn Fn(&Runtime, ObjectId, &ListRef) -> GrtResult<Value> + Send + Sync>;

/// Descriptor of one object member
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Member name, unique within the inheritance chain
    pub name: String,
    /// Declared type
    pub type_: TypeSpec,
    /// Default value text for simple members
    pub default_value: String,
    /// Whether plain `set_member` is rejected (all container members are)
    pub read_only: bool,
    /// Whether the member's object content is owned by the containing object
    pub owned: bool,
    /// Whether the member is computed rather than stored
    pub calculated: bool,
    /// Whether this entry overrides (refines) a parent member
    pub overrides: bool,
    /// Whether null values may be assigned/stored
    pub allow_null: bool,
}

impl Member {
    /// A member of the given type with permissive defaults
    pub fn new(name: impl Into<String>, type_: TypeSpec) -> Self {
        let read_only = type_.base.type_.is_container();
        Member {
            name: name.into(),
            type_,
            default_value: String::new(),
            read_only,
            owned: false,
            calculated: false,
            overrides: false,
            allow_null: true,
        }
    }

    /// A string member
    pub fn string(name: impl Into<String>) -> Self {
        Member::new(name, TypeSpec::of(Type::String))
    }

    /// An integer member
    pub fn integer(name: impl Into<String>) -> Self {
        Member::new(name, TypeSpec::of(Type::Integer))
    }

    /// A double member
    pub fn double(name: impl Into<String>) -> Self {
        Member::new(name, TypeSpec::of(Type::Double))
    }

    /// An object reference member (non-owning)
    pub fn object(name: impl Into<String>, class: impl Into<String>) -> Self {
        Member::new(name, TypeSpec::object(class))
    }

    /// A list member with the given content spec
    pub fn list(name: impl Into<String>, content: grt_sdk::SimpleTypeSpec) -> Self {
        Member::new(name, TypeSpec::list_of(content))
    }

    /// A dict member with the given content spec
    pub fn dict(name: impl Into<String>, content: grt_sdk::SimpleTypeSpec) -> Self {
        Member::new(name, TypeSpec::dict_of(content))
    }

    /// Mark the member's content as owned by the containing object
    pub fn owned(mut self) -> Self {
        self.owned = true;
        self
    }

    /// Mark the member read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set the default value text
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    /// Forbid null assignments
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }
}

/// Descriptor of one metaclass method
#[derive(Clone)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Return type (`Type::Any` base for void)
    pub ret_type: TypeSpec,
    /// Ordered argument specifications
    pub arg_types: Vec<ArgSpec>,
    /// Whether the method must be provided by a subclass
    pub abstract_: bool,
    /// Bound implementation, if any
    pub function: Option<MethodImpl>,
}

impl Method {
    /// A concrete method with no bound implementation yet
    pub fn new(name: impl Into<String>, ret_type: TypeSpec, arg_types: Vec<ArgSpec>) -> Self {
        Method {
            name: name.into(),
            ret_type,
            arg_types,
            abstract_: false,
            function: None,
        }
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("ret_type", &self.ret_type)
            .field("arg_types", &self.arg_types)
            .field("abstract_", &self.abstract_)
            .field("bound", &self.function.is_some())
            .finish()
    }
}

/// Reflection descriptor for one registered object class
#[derive(Debug, Clone)]
pub struct MetaClass {
    name: String,
    parent: Option<String>,
    placeholder: bool,
    source: String,
    members: BTreeMap<String, Member>,
    methods: BTreeMap<String, Method>,
    attributes: FxHashMap<String, String>,
}

/// Name of the implicit root class every metaclass ultimately derives from
pub const ROOT_CLASS_NAME: &str = "Object";

impl MetaClass {
    /// The registry's implicit root class
    pub(crate) fn root() -> MetaClass {
        MetaClass {
            name: ROOT_CLASS_NAME.to_string(),
            parent: None,
            placeholder: false,
            source: String::new(),
            members: BTreeMap::new(),
            methods: BTreeMap::new(),
            attributes: FxHashMap::default(),
        }
    }

    pub(crate) fn placeholder(name: &str, source: &str) -> MetaClass {
        MetaClass {
            name: name.to_string(),
            parent: None,
            placeholder: true,
            source: source.to_string(),
            members: BTreeMap::new(),
            methods: BTreeMap::new(),
            attributes: FxHashMap::default(),
        }
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent class name (`None` only for the root class)
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Whether this entry is an unresolved forward reference
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Definition file this class was loaded from (empty if programmatic)
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Members declared directly on this class (inherited members excluded)
    pub fn members_partial(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Methods declared directly on this class
    pub fn methods_partial(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }

    /// Member declared directly on this class
    pub fn own_member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Method declared directly on this class
    pub fn own_method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Attribute declared directly on this class (`"caption"` or
    /// `"member:desc"` style keys)
    pub fn own_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
}

/// Builder for programmatic metaclass registration
#[derive(Debug)]
pub struct MetaClassBuilder {
    class: MetaClass,
}

impl MetaClassBuilder {
    /// Start a class deriving from the root class
    pub fn new(name: impl Into<String>) -> Self {
        MetaClassBuilder {
            class: MetaClass {
                name: name.into(),
                parent: Some(ROOT_CLASS_NAME.to_string()),
                placeholder: false,
                source: String::new(),
                members: BTreeMap::new(),
                methods: BTreeMap::new(),
                attributes: FxHashMap::default(),
            },
        }
    }

    /// Set the parent class
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.class.parent = Some(parent.into());
        self
    }

    /// Add a member
    pub fn member(mut self, member: Member) -> Self {
        self.class.members.insert(member.name.clone(), member);
        self
    }

    /// Add a method
    pub fn method(mut self, method: Method) -> Self {
        self.class.methods.insert(method.name.clone(), method);
        self
    }

    /// Add a method with a bound implementation
    pub fn method_impl(
        mut self,
        name: impl Into<String>,
        ret_type: TypeSpec,
        arg_types: Vec<ArgSpec>,
        function: MethodImpl,
    ) -> Self {
        let mut method = Method::new(name, ret_type, arg_types);
        method.function = Some(function);
        self.class.methods.insert(method.name.clone(), method);
        self
    }

    /// Add a class-level attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.class.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a member attribute (stored under the `member:attr` key)
    pub fn member_attribute(
        mut self,
        member: impl AsRef<str>,
        attr: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.class.attributes.insert(
            format!("{}:{}", member.as_ref(), attr.as_ref()),
            value.into(),
        );
        self
    }

    /// Finish building
    pub fn build(self) -> MetaClass {
        self.class
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of metaclasses keyed by class name.
///
/// Populated during startup, frozen by `end_loading`; placeholder entries
/// stand in for forward-referenced parents until their definitions arrive.
#[derive(Debug, Default)]
pub(crate) struct MetaClassRegistry {
    classes: FxHashMap<String, Arc<MetaClass>>,
}

impl MetaClassRegistry {
    pub(crate) fn with_root() -> Self {
        let mut reg = MetaClassRegistry::default();
        reg.classes
            .insert(ROOT_CLASS_NAME.to_string(), Arc::new(MetaClass::root()));
        reg
    }

    /// Register a class definition; duplicate definitions are an error,
    /// but a definition may replace a placeholder of the same name.
    pub(crate) fn add(&mut self, mut class: MetaClass) -> GrtResult<()> {
        if let Some(existing) = self.classes.get(&class.name) {
            if !existing.is_placeholder() {
                return Err(GrtError::runtime(format!(
                    "Duplicate struct {}",
                    class.name
                )));
            }
        }
        // Register a placeholder for a not-yet-loaded parent so it can be
        // reported by name if the real definition never arrives.
        if let Some(parent) = class.parent.clone() {
            if !self.classes.contains_key(&parent) {
                tracing::debug!(class = %parent, "creating metaclass placeholder");
                self.classes.insert(
                    parent.clone(),
                    Arc::new(MetaClass::placeholder(&parent, &class.source)),
                );
            }
        }
        // Container members can never be replaced wholesale through
        // set_member, only mutated through their accessors.
        for member in class.members.values_mut() {
            if member.type_.base.type_.is_container() {
                member.read_only = true;
            }
        }
        self.classes.insert(class.name.clone(), Arc::new(class));
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<MetaClass>> {
        self.classes.get(name).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Arc<MetaClass>> {
        self.classes.values().cloned().collect()
    }

    /// Walk the inheritance chain from `class` to the root, inclusive
    pub(crate) fn chain(&self, class: &str) -> Vec<Arc<MetaClass>> {
        let mut out = Vec::new();
        let mut current = self.get(class);
        while let Some(mc) = current {
            current = mc.parent().and_then(|p| self.get(p));
            out.push(mc);
        }
        out
    }

    /// Find a member anywhere in the inheritance chain
    pub(crate) fn member_info(&self, class: &str, member: &str) -> Option<Member> {
        for mc in self.chain(class) {
            if let Some(m) = mc.own_member(member) {
                return Some(m.clone());
            }
        }
        None
    }

    /// Find a method anywhere in the inheritance chain
    pub(crate) fn method_info(&self, class: &str, method: &str) -> Option<Method> {
        for mc in self.chain(class) {
            if let Some(m) = mc.own_method(method) {
                return Some(m.clone());
            }
        }
        None
    }

    /// Find a member attribute, searching parent classes
    pub(crate) fn member_attribute(&self, class: &str, member: &str, attr: &str) -> Option<String> {
        let key = format!("{member}:{attr}");
        for mc in self.chain(class) {
            if let Some(v) = mc.own_attribute(&key) {
                return Some(v.to_string());
            }
        }
        None
    }

    /// Find a class attribute, searching parent classes
    pub(crate) fn class_attribute(&self, class: &str, attr: &str) -> Option<String> {
        for mc in self.chain(class) {
            if let Some(v) = mc.own_attribute(attr) {
                return Some(v.to_string());
            }
        }
        None
    }

    /// Whether `class` is `ancestor` or derives from it
    pub(crate) fn is_a(&self, class: &str, ancestor: &str) -> bool {
        self.chain(class).iter().any(|mc| mc.name() == ancestor)
    }

    /// Visit every member visible on `class`, inherited ones included.
    ///
    /// Entries marked `overrides` are skipped in derived classes (the base
    /// declaration is the one visited), so each member is seen exactly once.
    pub(crate) fn foreach_member(&self, class: &str, mut visitor: impl FnMut(&Member)) {
        for mc in self.chain(class) {
            for member in mc.members_partial() {
                if member.overrides {
                    continue;
                }
                visitor(member);
            }
        }
    }

    /// Whether allocation must be refused because of unimplemented
    /// abstract methods
    pub(crate) fn is_abstract(&self, class: &str) -> bool {
        self.chain(class)
            .iter()
            .flat_map(|mc| mc.methods_partial())
            .any(|m| m.abstract_ && m.function.is_none())
    }

    /// Bind a method implementation onto a registered class.
    ///
    /// Must happen during the loading phase, before objects of the class
    /// are allocated.
    pub(crate) fn bind_method(
        &mut self,
        class: &str,
        method: &str,
        function: MethodImpl,
    ) -> GrtResult<()> {
        let mc = self
            .classes
            .get(class)
            .ok_or_else(|| GrtError::BadClass(class.to_string()))?;
        let mut updated = (**mc).clone();
        let entry = updated
            .methods
            .get_mut(method)
            .ok_or_else(|| GrtError::runtime(format!("Attempt to bind invalid method {method}")))?;
        entry.function = Some(function);
        entry.abstract_ = false;
        self.classes.insert(class.to_string(), Arc::new(updated));
        Ok(())
    }

    /// Finish the loading phase.
    ///
    /// Fails if any placeholder was never resolved, and validates member
    /// overrides across the inheritance chain: a derived class redeclaring
    /// a member with an incompatible type is a load-time hard error.
    /// Compatible redeclarations are marked `overrides`.
    pub(crate) fn end_loading(&mut self) -> GrtResult<()> {
        for mc in self.classes.values() {
            if mc.is_placeholder() {
                return Err(GrtError::runtime(format!(
                    "MetaClass '{}' is undefined but was referred to in '{}'",
                    mc.name(),
                    mc.source()
                )));
            }
        }

        let names: Vec<String> = self.classes.keys().cloned().collect();
        for name in names {
            self.validate_overrides(&name)?;
        }
        Ok(())
    }

    fn validate_overrides(&mut self, class: &str) -> GrtResult<()> {
        let mc = match self.classes.get(class) {
            Some(mc) => mc.clone(),
            None => return Ok(()),
        };
        let parent = match mc.parent() {
            Some(p) => p.to_string(),
            None => return Ok(()),
        };

        let mut override_marks = Vec::new();
        for member in mc.members_partial() {
            let base = match self.member_info(&parent, &member.name) {
                Some(base) => base,
                None => continue,
            };
            if base.type_.base.type_ != member.type_.base.type_ {
                return Err(GrtError::runtime(format!(
                    "Member {}::{} overrides a member with a different base type",
                    class, member.name
                )));
            }
            match base.type_.base.type_ {
                Type::List | Type::Dict => {
                    if base.type_.content.type_ != member.type_.content.type_ {
                        return Err(GrtError::runtime(format!(
                            "Member {}::{} overrides a member with a different content type",
                            class, member.name
                        )));
                    }
                    if base.type_.content.type_ == Type::Object {
                        let derived_class = &member.type_.content.object_class;
                        let base_class = &base.type_.content.object_class;
                        if self.get(derived_class).is_none() {
                            return Err(GrtError::runtime(format!(
                                "Member {}::{} has invalid content object class '{}'",
                                class, member.name, derived_class
                            )));
                        }
                        if !self.is_a(derived_class, base_class) {
                            return Err(GrtError::runtime(format!(
                                "Member {}::{} overrides a member with an incompatible content object class",
                                class, member.name
                            )));
                        }
                    }
                }
                Type::Object => {
                    if base.type_.base.object_class != member.type_.base.object_class
                        && !self.is_a(
                            &member.type_.base.object_class,
                            &base.type_.base.object_class,
                        )
                    {
                        return Err(GrtError::runtime(format!(
                            "Member {}::{} overrides a member with an incompatible class",
                            class, member.name
                        )));
                    }
                }
                _ => {}
            }
            override_marks.push(member.name.clone());
        }

        if !override_marks.is_empty() {
            let mut updated = (*mc).clone();
            for name in override_marks {
                if let Some(member) = updated.members.get_mut(&name) {
                    member.overrides = true;
                }
            }
            self.classes.insert(class.to_string(), Arc::new(updated));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grt_sdk::SimpleTypeSpec;

    fn registry() -> MetaClassRegistry {
        MetaClassRegistry::with_root()
    }

    #[test]
    fn test_register_and_chain() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("db.DatabaseObject")
            .member(Member::string("name"))
            .build())
            .unwrap();
        reg.add(MetaClassBuilder::new("db.Table")
            .parent("db.DatabaseObject")
            .member(Member::list("columns", SimpleTypeSpec::object("db.Column")).owned())
            .build())
            .unwrap();

        let chain: Vec<String> = reg
            .chain("db.Table")
            .iter()
            .map(|mc| mc.name().to_string())
            .collect();
        assert_eq!(chain, vec!["db.Table", "db.DatabaseObject", ROOT_CLASS_NAME]);
        assert!(reg.is_a("db.Table", "db.DatabaseObject"));
        assert!(reg.is_a("db.Table", ROOT_CLASS_NAME));
        assert!(!reg.is_a("db.DatabaseObject", "db.Table"));
    }

    #[test]
    fn test_inherited_member_lookup() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("base").member(Member::string("name")).build())
            .unwrap();
        reg.add(MetaClassBuilder::new("derived").parent("base").build())
            .unwrap();

        let info = reg.member_info("derived", "name").unwrap();
        assert_eq!(info.type_, TypeSpec::of(Type::String));
        assert!(reg.member_info("derived", "missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("dup").build()).unwrap();
        assert!(reg.add(MetaClassBuilder::new("dup").build()).is_err());
    }

    #[test]
    fn test_placeholder_resolution() {
        let mut reg = registry();
        // parent referenced before it is defined
        reg.add(MetaClassBuilder::new("child").parent("missing.Parent").build())
            .unwrap();
        assert!(reg.get("missing.Parent").unwrap().is_placeholder());
        assert!(reg.end_loading().is_err());

        reg.add(MetaClassBuilder::new("missing.Parent").build()).unwrap();
        assert!(!reg.get("missing.Parent").unwrap().is_placeholder());
        reg.end_loading().unwrap();
    }

    #[test]
    fn test_override_type_mismatch_is_hard_error() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("base").member(Member::string("name")).build())
            .unwrap();
        reg.add(MetaClassBuilder::new("derived")
            .parent("base")
            .member(Member::integer("name"))
            .build())
            .unwrap();
        assert!(reg.end_loading().is_err());
    }

    #[test]
    fn test_compatible_override_is_marked() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("base")
            .member(Member::string("comment"))
            .build())
            .unwrap();
        reg.add(MetaClassBuilder::new("derived")
            .parent("base")
            .member(Member::string("comment").default("n/a"))
            .build())
            .unwrap();
        reg.end_loading().unwrap();

        let derived = reg.get("derived").unwrap();
        assert!(derived.own_member("comment").unwrap().overrides);

        // foreach_member must visit "comment" exactly once
        let mut seen = Vec::new();
        reg.foreach_member("derived", |m| seen.push(m.name.clone()));
        assert_eq!(seen.iter().filter(|n| *n == "comment").count(), 1);
    }

    #[test]
    fn test_container_members_forced_read_only() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("holder")
            .member(Member::list("items", SimpleTypeSpec::default()))
            .build())
            .unwrap();
        assert!(reg.member_info("holder", "items").unwrap().read_only);
    }

    #[test]
    fn test_member_attributes_search_parents() {
        let mut reg = registry();
        reg.add(MetaClassBuilder::new("base")
            .member(Member::string("name"))
            .member_attribute("name", "desc", "object name")
            .build())
            .unwrap();
        reg.add(MetaClassBuilder::new("derived").parent("base").build())
            .unwrap();

        assert_eq!(
            reg.member_attribute("derived", "name", "desc").as_deref(),
            Some("object name")
        );
        assert!(reg.member_attribute("derived", "name", "editas").is_none());
    }

    #[test]
    fn test_abstract_class_detection() {
        let mut reg = registry();
        let mut method = Method::new("render", TypeSpec::of(Type::String), vec![]);
        method.abstract_ = true;
        reg.add(MetaClassBuilder::new("shape").method(method).build())
            .unwrap();
        assert!(reg.is_abstract("shape"));

        reg.bind_method(
            "shape",
            "render",
            Arc::new(|_rt, _obj, _args| Ok(Value::from("circle"))),
        )
        .unwrap();
        assert!(!reg.is_abstract("shape"));
    }
}
