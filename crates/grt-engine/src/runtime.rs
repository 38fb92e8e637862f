//! Runtime context
//!
//! [`Runtime`] replaces the original's process-wide singleton with an
//! explicit context object passed to all registration and lookup calls. It
//! owns the metaclass registry, the object space, the module and interface
//! registries, the module loaders, and the root value tree. Registries are
//! populated once at startup and treated as read-only afterwards; the
//! object tree is meant to be mutated from one thread at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use grt_sdk::{GrtError, GrtResult, SimpleTypeSpec, Type, TypeSpec};

use crate::get_guid;
use crate::module::{Interface, Module, ModuleLoader};
use crate::object::{ChangeEvent, ObjectData, ObjectId, ObjectSpace};
use crate::reflect::{
    load_metaclass_defs, Member, MetaClass, MetaClassRegistry, Method, MethodImpl,
};
use crate::value::{DictRef, ListRef, Value};

/// Startup configuration for a [`Runtime`]
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Emit verbose progress messages (also enabled by `GRT_VERBOSE`)
    pub verbose: bool,
    /// Directories scanned for `structs.*.json` metaclass definitions
    pub metaclass_paths: Vec<PathBuf>,
    /// Directories scanned for loadable modules
    pub module_paths: Vec<PathBuf>,
}

/// Message severity for the runtime message channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Raw output text from a module
    Output,
    /// Progress update; see [`Message::progress`]
    Progress,
}

/// A message sent through the runtime's handler stack
#[derive(Debug, Clone)]
pub struct Message {
    /// Severity
    pub kind: MessageKind,
    /// Message text
    pub text: String,
    /// Optional detail
    pub detail: String,
    /// Progress in `0.0..=1.0` for `Progress` messages
    pub progress: f32,
}

type MessageHandler = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
type ChangeObserver = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// The GRT runtime context
pub struct Runtime {
    classes: RwLock<MetaClassRegistry>,
    objects: ObjectSpace,
    modules: RwLock<Vec<Arc<Module>>>,
    interfaces: RwLock<FxHashMap<String, Arc<Interface>>>,
    loaders: RwLock<Vec<Arc<dyn ModuleLoader>>>,
    root: RwLock<Value>,
    object_cache: RwLock<FxHashMap<String, ObjectId>>,
    observers: RwLock<Vec<ChangeObserver>>,
    message_handlers: RwLock<Vec<MessageHandler>>,
    progress_steps: RwLock<Vec<(f32, f32)>>,
    verbose: AtomicBool,
    options: RuntimeOptions,
}

impl Runtime {
    /// Create a runtime with the base object class registered and the
    /// native module loader installed.
    pub fn new(options: RuntimeOptions) -> Arc<Runtime> {
        let verbose = options.verbose || std::env::var_os("GRT_VERBOSE").is_some();
        let rt = Arc::new(Runtime {
            classes: RwLock::new(MetaClassRegistry::with_root()),
            objects: ObjectSpace::default(),
            modules: RwLock::new(Vec::new()),
            interfaces: RwLock::new(FxHashMap::default()),
            loaders: RwLock::new(Vec::new()),
            root: RwLock::new(Value::Dict(DictRef::new())),
            object_cache: RwLock::new(FxHashMap::default()),
            observers: RwLock::new(Vec::new()),
            message_handlers: RwLock::new(Vec::new()),
            progress_steps: RwLock::new(Vec::new()),
            verbose: AtomicBool::new(verbose),
            options,
        });

        rt.add_module_loader(Arc::new(
            crate::module::native::NativeModuleLoader::default(),
        ));
        rt
    }

    /// The options this runtime was created with
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Scan the configured metaclass and module paths.
    ///
    /// Loads `structs.*.json` files from every configured metaclass
    /// directory, ends the metaclass loading phase, then scans the
    /// configured module directories (accepting any extension a loader
    /// claims). Returns (classes, modules) loaded.
    pub fn initialize(&self) -> GrtResult<(usize, usize)> {
        let mut classes = 0;
        for dir in &self.options.metaclass_paths {
            classes += self.scan_metaclasses_in(dir)?;
        }
        self.end_loading_metaclasses()?;

        let mut modules = 0;
        for dir in &self.options.module_paths {
            modules += self.scan_modules_in(dir, &[])?;
        }
        Ok((classes, modules))
    }

    /// Whether verbose messages are enabled
    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Toggle verbose messages
    pub fn set_verbose(&self, flag: bool) {
        self.verbose.store(flag, Ordering::Relaxed);
    }

    // ========================================================================
    // Metaclasses
    // ========================================================================

    /// Register one metaclass definition
    pub fn add_metaclass(&self, class: MetaClass) -> GrtResult<()> {
        self.classes.write().add(class)
    }

    /// Look up a metaclass by name
    pub fn get_metaclass(&self, name: &str) -> Option<Arc<MetaClass>> {
        self.classes.read().get(name)
    }

    /// All registered metaclasses
    pub fn metaclasses(&self) -> Vec<Arc<MetaClass>> {
        self.classes.read().all()
    }

    /// Load metaclass definitions from one JSON file
    pub fn load_metaclasses(&self, path: &Path) -> GrtResult<usize> {
        let defs = load_metaclass_defs(path)?;
        let count = defs.len();
        let mut registry = self.classes.write();
        for class in defs {
            registry.add(class)?;
        }
        Ok(count)
    }

    /// Scan a directory for `structs.*.json` files and load them.
    ///
    /// Returns the number of classes registered.
    pub fn scan_metaclasses_in(&self, directory: &Path) -> GrtResult<usize> {
        let entries = std::fs::read_dir(directory)
            .map_err(|e| GrtError::os(format!("Invalid path {}", directory.display()), &e))?;

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with("structs.") && name.ends_with(".json") {
                count += self.load_metaclasses(&path)?;
            }
        }
        Ok(count)
    }

    /// End the metaclass loading phase: placeholders must be resolved and
    /// member overrides are validated (incompatibilities are hard errors).
    pub fn end_loading_metaclasses(&self) -> GrtResult<()> {
        self.classes.write().end_loading()
    }

    /// Bind a method implementation onto a registered class (loading phase)
    pub fn bind_method(&self, class: &str, method: &str, function: MethodImpl) -> GrtResult<()> {
        self.classes.write().bind_method(class, method, function)
    }

    /// Member descriptor, searching the inheritance chain
    pub fn member_info(&self, class: &str, member: &str) -> Option<Member> {
        self.classes.read().member_info(class, member)
    }

    /// Method descriptor, searching the inheritance chain
    pub fn method_info(&self, class: &str, method: &str) -> Option<Method> {
        self.classes.read().method_info(class, method)
    }

    /// Member attribute (`desc`, `readonly`, `editas`, ...), searching parents
    pub fn member_attribute(&self, class: &str, member: &str, attr: &str) -> Option<String> {
        self.classes.read().member_attribute(class, member, attr)
    }

    /// Class attribute, searching parents
    pub fn class_attribute(&self, class: &str, attr: &str) -> Option<String> {
        self.classes.read().class_attribute(class, attr)
    }

    /// Visit every member visible on `class`, inherited members included
    pub fn foreach_member(&self, class: &str, visitor: impl FnMut(&Member)) {
        self.classes.read().foreach_member(class, visitor)
    }

    /// Whether `class` is `ancestor` or derives from it
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        self.classes.read().is_a(class, ancestor)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Allocate a new instance of a registered class.
    ///
    /// Members are default-initialized per their type specs: containers are
    /// created typed (and owned where declared), simple members take their
    /// declared defaults, object members start null.
    pub fn allocate(&self, class_name: &str) -> GrtResult<ObjectId> {
        let (class, members) = {
            let registry = self.classes.read();
            let class = registry
                .get(class_name)
                .ok_or_else(|| GrtError::BadClass(class_name.to_string()))?;
            if class.is_placeholder() {
                return Err(GrtError::BadClass(class_name.to_string()));
            }
            if registry.is_abstract(class_name) {
                return Err(GrtError::runtime(format!(
                    "cannot allocate abstract class {class_name}"
                )));
            }
            let mut members = Vec::new();
            registry.foreach_member(class_name, |m| {
                if !m.calculated {
                    members.push(m.clone());
                }
            });
            (class, members)
        };

        let id = self.objects.insert(ObjectData {
            guid: get_guid(),
            class,
            owner: None,
            members: Default::default(),
        });

        for member in members {
            let value = self.default_member_value(id, &member);
            self.objects.set_member_raw(id, &member.name, value);
        }
        Ok(id)
    }

    fn default_member_value(&self, id: ObjectId, member: &Member) -> Value {
        match member.type_.base.type_ {
            Type::Integer => Value::Integer(member.default_value.parse().unwrap_or(0)),
            Type::Double => Value::Double(member.default_value.parse().unwrap_or(0.0)),
            Type::String => Value::from(member.default_value.as_str()),
            Type::List => {
                let content = member.type_.content.clone();
                if member.owned {
                    Value::List(ListRef::owned(content, member.allow_null, id, &member.name))
                } else {
                    Value::List(ListRef::typed(content, member.allow_null))
                }
            }
            Type::Dict => {
                let content = member.type_.content.clone();
                if member.owned {
                    Value::Dict(DictRef::owned(content, member.allow_null, id, &member.name))
                } else {
                    Value::Dict(DictRef::typed(content, member.allow_null))
                }
            }
            Type::Object | Type::Any => Value::Null,
        }
    }

    /// Whether `id` refers to an object in this runtime
    pub fn object_is_valid(&self, id: ObjectId) -> bool {
        self.objects.contains(id)
    }

    /// The object's unique identifier string
    pub fn object_guid(&self, id: ObjectId) -> Option<String> {
        self.objects.guid(id)
    }

    pub(crate) fn set_object_guid(&self, id: ObjectId, guid: String) {
        self.objects.set_guid(id, guid);
        // guid changes invalidate the id lookup cache
        self.object_cache.write().clear();
    }

    /// The object's class name
    pub fn object_class_name(&self, id: ObjectId) -> Option<String> {
        self.objects.class(id).map(|c| c.name().to_string())
    }

    /// The object's metaclass
    pub fn object_class(&self, id: ObjectId) -> Option<Arc<MetaClass>> {
        self.objects.class(id)
    }

    /// The object's structural parent, if set
    pub fn owner(&self, id: ObjectId) -> Option<ObjectId> {
        self.objects.owner(id)
    }

    /// Set the object's structural parent back-reference
    pub fn set_owner(&self, id: ObjectId, owner: Option<ObjectId>) {
        self.objects.set_owner(id, owner);
    }

    /// Whether the object is an instance of `class_name` or a subclass.
    ///
    /// An empty class name matches any object.
    pub fn is_instance(&self, id: ObjectId, class_name: &str) -> bool {
        if class_name.is_empty() {
            return self.objects.contains(id);
        }
        match self.object_class_name(id) {
            Some(actual) => self.classes.read().is_a(&actual, class_name),
            None => false,
        }
    }

    /// Whether the object's class (chain) declares `member`
    pub fn has_member(&self, id: ObjectId, member: &str) -> bool {
        if member == "owner" {
            return self.objects.contains(id);
        }
        match self.object_class_name(id) {
            Some(class) => self.member_info(&class, member).is_some(),
            None => false,
        }
    }

    /// Whether the object's class (chain) declares `method`
    pub fn has_method(&self, id: ObjectId, method: &str) -> bool {
        match self.object_class_name(id) {
            Some(class) => self.method_info(&class, method).is_some(),
            None => false,
        }
    }

    /// Read a member value.
    ///
    /// The intrinsic `owner` back-reference reads like a member. Unknown
    /// members signal `BadItem`.
    pub fn get_member(&self, id: ObjectId, member: &str) -> GrtResult<Value> {
        if member == "owner" {
            return Ok(match self.objects.owner(id) {
                Some(owner) => Value::Object(owner),
                None => Value::Null,
            });
        }
        if let Some(value) = self.objects.member(id, member) {
            return Ok(value);
        }
        // calculated members have no storage; everything else is unknown
        let class = self
            .object_class_name(id)
            .ok_or_else(|| GrtError::BadItem(member.to_string()))?;
        match self.member_info(&class, member) {
            Some(_) => Ok(Value::Null),
            None => Err(GrtError::BadItem(format!("{class}.{member}"))),
        }
    }

    /// Convenience accessor for string members
    pub fn get_string_member(&self, id: ObjectId, member: &str) -> GrtResult<String> {
        Ok(self.get_member(id, member)?.as_string()?.to_string())
    }

    /// Convenience accessor for integer members
    pub fn get_integer_member(&self, id: ObjectId, member: &str) -> GrtResult<i64> {
        self.get_member(id, member)?.as_int()
    }

    /// Assign a member value.
    ///
    /// Rejects unknown members (`BadItem`), read-only and container members
    /// (`ReadOnly`), and values outside the member's declared type spec
    /// (`Type`); a rejected set leaves the object unchanged. The intrinsic
    /// `owner` member may be assigned any object reference or null.
    pub fn set_member(&self, id: ObjectId, member: &str, value: Value) -> GrtResult<()> {
        self.set_member_internal(id, member, value, false)
    }

    /// Assign a member value bypassing the read-only check.
    ///
    /// Used by the copy machinery, which must populate read-only members of
    /// fresh duplicates.
    pub fn set_member_unchecked(&self, id: ObjectId, member: &str, value: Value) -> GrtResult<()> {
        self.set_member_internal(id, member, value, true)
    }

    fn set_member_internal(
        &self,
        id: ObjectId,
        member: &str,
        value: Value,
        force: bool,
    ) -> GrtResult<()> {
        if member == "owner" {
            let owner = match value {
                Value::Null => None,
                Value::Object(o) => Some(o),
                other => {
                    return Err(GrtError::type_mismatch("object", other.type_name()));
                }
            };
            self.objects.set_owner(id, owner);
            self.emit(ChangeEvent::MemberChanged {
                object: id,
                member: member.to_string(),
            });
            return Ok(());
        }

        let class = self
            .object_class_name(id)
            .ok_or_else(|| GrtError::BadItem(member.to_string()))?;
        let info = self
            .member_info(&class, member)
            .ok_or_else(|| GrtError::BadItem(format!("{class}.{member}")))?;

        if !force {
            if info.type_.base.type_.is_container() {
                return Err(GrtError::ReadOnly(format!(
                    "{class}.{member} (which is a container)"
                )));
            }
            if info.read_only || info.calculated {
                return Err(GrtError::ReadOnly(format!("{class}.{member}")));
            }
        }

        self.check_member_value(&info, &value)?;
        self.objects.set_member_raw(id, member, value);
        self.emit(ChangeEvent::MemberChanged {
            object: id,
            member: member.to_string(),
        });
        Ok(())
    }

    fn check_member_value(&self, member: &Member, value: &Value) -> GrtResult<()> {
        if value.is_null() {
            if member.allow_null || member.type_.base.type_ == Type::Object {
                return Ok(());
            }
            return Err(GrtError::NullValue(format!(
                "member {} does not accept null",
                member.name
            )));
        }
        if member.type_.base.type_ == Type::Any {
            return Ok(());
        }
        if value.type_() != member.type_.base.type_ {
            return Err(GrtError::type_mismatch(
                member.type_.to_string(),
                value.type_name(),
            ));
        }
        if let Value::Object(obj) = value {
            let class = &member.type_.base.object_class;
            if !class.is_empty() && !self.is_instance(*obj, class) {
                return Err(GrtError::type_mismatch(
                    class.clone(),
                    self.object_class_name(*obj).unwrap_or_default(),
                ));
            }
        }
        Ok(())
    }

    /// Check a value against a declared container content type
    pub fn check_content(&self, spec: &SimpleTypeSpec, value: &Value) -> GrtResult<()> {
        if spec.type_ == Type::Any {
            return Ok(());
        }
        if value.type_() != spec.type_ {
            return Err(GrtError::type_mismatch(spec.to_string(), value.type_name()));
        }
        if let Value::Object(obj) = value {
            if !spec.object_class.is_empty() && !self.is_instance(*obj, &spec.object_class) {
                return Err(GrtError::type_mismatch(
                    spec.object_class.clone(),
                    self.object_class_name(*obj).unwrap_or_default(),
                ));
            }
        }
        Ok(())
    }

    /// Check a value against a full type spec (argument/return validation)
    pub fn check_type(&self, spec: &TypeSpec, value: &Value) -> GrtResult<()> {
        if spec.base.type_ == Type::Any || value.is_null() {
            return Ok(());
        }
        if value.type_() != spec.base.type_ {
            return Err(GrtError::type_mismatch(spec.to_string(), value.type_name()));
        }
        if let Value::Object(obj) = value {
            let class = &spec.base.object_class;
            if !class.is_empty() && !self.is_instance(*obj, class) {
                return Err(GrtError::type_mismatch(
                    class.clone(),
                    self.object_class_name(*obj).unwrap_or_default(),
                ));
            }
        }
        Ok(())
    }

    /// Call a metaclass method on an object
    pub fn call_method(&self, id: ObjectId, method: &str, args: &ListRef) -> GrtResult<Value> {
        let class = self
            .object_class_name(id)
            .ok_or_else(|| GrtError::BadItem(method.to_string()))?;
        let info = self
            .method_info(&class, method)
            .ok_or_else(|| GrtError::BadItem(format!("{class}.{method}")))?;
        let function = info.function.clone().ok_or_else(|| {
            GrtError::runtime(format!("method {class}.{method} has no bound implementation"))
        })?;
        function(self, id, args)
    }

    /// Number of objects allocated in this runtime
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    // ========================================================================
    // Root tree
    // ========================================================================

    /// The root value of the runtime tree
    pub fn root(&self) -> Value {
        self.root.read().clone()
    }

    /// Replace the root value
    pub fn set_root(&self, value: Value) {
        *self.root.write() = value;
        self.object_cache.write().clear();
    }

    /// Navigate the root tree by slash-separated path
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.root();
        crate::path::get_value_by_path(self, &root, path)
    }

    /// Set a value in the root tree by slash-separated path
    pub fn set(&self, path: &str, value: Value) -> GrtResult<()> {
        let root = self.root();
        if crate::path::set_value_by_path(self, &root, path, value) {
            Ok(())
        } else {
            Err(GrtError::BadItem(format!("Invalid path {path}")))
        }
    }

    /// Find an object by its guid somewhere under `subpath`.
    ///
    /// Successful lookups are cached; the cache is cleared whenever guids
    /// change or the root is replaced.
    pub fn find_object_by_id(&self, guid: &str, subpath: &str) -> Option<ObjectId> {
        if let Some(id) = self.object_cache.read().get(guid) {
            return Some(*id);
        }
        let start = self.get(subpath)?;
        let found = crate::tree::find_child_object(self, &start, guid, true);
        if let Some(id) = found {
            self.object_cache.write().insert(guid.to_string(), id);
        }
        found
    }

    // ========================================================================
    // Change observers
    // ========================================================================

    /// Register a change observer receiving every tree mutation event
    pub fn observe(&self, observer: ChangeObserver) {
        self.observers.write().push(observer);
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        let observers: Vec<ChangeObserver> = self.observers.read().clone();
        for observer in observers {
            observer(&event);
        }
    }

    // ========================================================================
    // Modules, interfaces, loaders
    // ========================================================================

    /// Install a module loader; the loader is refreshed immediately
    pub fn add_module_loader(&self, loader: Arc<dyn ModuleLoader>) {
        loader.refresh();
        self.loaders.write().push(loader);
    }

    /// Find a loader by name
    pub fn get_module_loader(&self, name: &str) -> Option<Arc<dyn ModuleLoader>> {
        self.loaders
            .read()
            .iter()
            .find(|l| l.loader_name() == name)
            .cloned()
    }

    /// Find the loader responsible for a module file
    pub fn get_module_loader_for_file(&self, path: &Path) -> Option<Arc<dyn ModuleLoader>> {
        self.loaders
            .read()
            .iter()
            .find(|l| l.check_file_extension(path))
            .cloned()
    }

    /// Try to load a module file with the first loader claiming its
    /// extension. Returns false when no loader matched.
    pub fn load_module(&self, path: &Path) -> GrtResult<bool> {
        let loader = match self.get_module_loader_for_file(path) {
            Some(loader) => loader,
            None => return Ok(false),
        };
        tracing::debug!(path = %path.display(), loader = loader.loader_name(), "loading module");
        let module = loader.init_module(path)?;
        self.register_module(module)?;
        Ok(true)
    }

    /// Register a fully built module.
    ///
    /// The module is validated; registering a second module with the same
    /// name is an error.
    pub fn register_module(&self, module: Module) -> GrtResult<()> {
        module.validate()?;
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.name() == module.name()) {
            return Err(GrtError::runtime(format!(
                "Duplicate module {}",
                module.name()
            )));
        }
        modules.push(Arc::new(module));
        Ok(())
    }

    /// Scan a directory for loadable modules.
    ///
    /// Files failing to load are reported as warnings and skipped; the scan
    /// continues. Returns the number of modules loaded.
    pub fn scan_modules_in(&self, path: &Path, extensions: &[&str]) -> GrtResult<usize> {
        let entries = std::fs::read_dir(path).map_err(|e| {
            GrtError::os(format!("Cannot open module directory {}", path.display()), &e)
        })?;

        if self.verbose() {
            self.send_info(&format!("Scanning module directory {}.", path.display()), "");
        }

        let mut count = 0;
        for entry in entries.flatten() {
            let module_path = entry.path();
            if !module_path.is_file() {
                continue;
            }
            if !extensions.is_empty() {
                let matches = module_path
                    .extension()
                    .map(|e| extensions.iter().any(|x| e.to_string_lossy().as_ref() == *x))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            match self.load_module(&module_path) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => {
                    self.send_warning(
                        &format!("Could not load {}: {err}", module_path.display()),
                        "",
                    );
                }
            }
        }
        Ok(count)
    }

    /// Look up a module by name
    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules
            .read()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    /// All registered modules, sorted by name
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> = self.modules.read().clone();
        modules.sort_by(|a, b| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
        modules
    }

    /// Call a module function by module and function name
    pub fn call_module_function(
        &self,
        module: &str,
        function: &str,
        args: &ListRef,
    ) -> GrtResult<Value> {
        let m = self
            .get_module(module)
            .ok_or_else(|| GrtError::module(format!("Module {module} not found")))?;
        m.call_function(self, function, args)
    }

    /// Modules implementing `interface_name` (empty matches all) whose name
    /// matches the glob `name_pattern` (empty matches all).
    pub fn find_modules_matching(&self, interface_name: &str, name_pattern: &str) -> Vec<Arc<Module>> {
        let pattern = if name_pattern.is_empty() {
            None
        } else {
            glob::Pattern::new(name_pattern).ok()
        };
        self.modules
            .read()
            .iter()
            .filter(|m| {
                interface_name.is_empty()
                    || m.info().implements.iter().any(|i| i == interface_name)
            })
            .filter(|m| match (&pattern, name_pattern.is_empty()) {
                (_, true) => true,
                (Some(p), _) => p.matches(m.name()),
                (None, false) => false,
            })
            .cloned()
            .collect()
    }

    /// Register an interface declaration; duplicates are an error
    pub fn register_interface(&self, interface: Interface) -> GrtResult<()> {
        let mut interfaces = self.interfaces.write();
        if interfaces.contains_key(&interface.name) {
            return Err(GrtError::runtime(format!(
                "Duplicate interface {}",
                interface.name
            )));
        }
        interfaces.insert(interface.name.clone(), Arc::new(interface));
        Ok(())
    }

    /// Look up an interface by name
    pub fn get_interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.read().get(name).cloned()
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Push a message handler; the most recently pushed handler is offered
    /// messages first and may decline them by returning false.
    pub fn push_message_handler(&self, handler: MessageHandler) {
        self.message_handlers.write().push(handler);
    }

    /// Pop the top message handler
    pub fn pop_message_handler(&self) {
        let mut handlers = self.message_handlers.write();
        if handlers.pop().is_none() {
            tracing::error!("pop_message_handler called on empty handler stack");
        }
    }

    fn handle_message(&self, msg: Message) {
        let handlers: Vec<MessageHandler> = self.message_handlers.read().clone();
        for handler in handlers.iter().rev() {
            if handler(&msg) {
                return;
            }
        }
        match msg.kind {
            MessageKind::Error => tracing::error!("{}\t{}", msg.text, msg.detail),
            MessageKind::Warning => tracing::warn!("{}\t{}", msg.text, msg.detail),
            MessageKind::Progress => {}
            _ => tracing::debug!("{}\t{}", msg.text, msg.detail),
        }
    }

    /// Send an informational message
    pub fn send_info(&self, text: &str, detail: &str) {
        self.handle_message(Message {
            kind: MessageKind::Info,
            text: text.to_string(),
            detail: detail.to_string(),
            progress: 0.0,
        });
    }

    /// Send a warning message
    pub fn send_warning(&self, text: &str, detail: &str) {
        self.handle_message(Message {
            kind: MessageKind::Warning,
            text: text.to_string(),
            detail: detail.to_string(),
            progress: 0.0,
        });
    }

    /// Send an error message
    pub fn send_error(&self, text: &str, detail: &str) {
        self.handle_message(Message {
            kind: MessageKind::Error,
            text: text.to_string(),
            detail: detail.to_string(),
            progress: 0.0,
        });
    }

    /// Send raw module output
    pub fn send_output(&self, text: &str) {
        self.handle_message(Message {
            kind: MessageKind::Output,
            text: text.to_string(),
            detail: String::new(),
            progress: 0.0,
        });
    }

    /// Begin a progress sub-task covering `from..to` of the parent task
    pub fn begin_progress_step(&self, from: f32, to: f32) {
        self.progress_steps.write().push((from, to));
    }

    /// End the current progress sub-task
    pub fn end_progress_step(&self) {
        self.progress_steps.write().pop();
    }

    /// Send a progress update, scaled through the progress-step stack so
    /// sub-tasks only report their own 0.0..=1.0 range.
    pub fn send_progress(&self, mut percentage: f32, text: &str, detail: &str) {
        for (from, to) in self.progress_steps.read().iter().rev() {
            percentage = from + (to - from) * percentage;
        }
        self.handle_message(Message {
            kind: MessageKind::Progress,
            text: text.to_string(),
            detail: detail.to_string(),
            progress: percentage,
        });
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("classes", &self.metaclasses().len())
            .field("objects", &self.objects.len())
            .field("modules", &self.modules.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Member, MetaClassBuilder};
    use grt_sdk::SimpleTypeSpec;

    fn runtime_with_db_classes() -> Arc<Runtime> {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.add_metaclass(
            MetaClassBuilder::new("db.Column")
                .member(Member::string("name"))
                .build(),
        )
        .unwrap();
        rt.add_metaclass(
            MetaClassBuilder::new("db.Table")
                .member(Member::string("name"))
                .member(Member::integer("rowCount").read_only())
                .member(Member::list("columns", SimpleTypeSpec::object("db.Column")).owned())
                .member(Member::object("schema", "db.Schema"))
                .build(),
        )
        .unwrap();
        rt.add_metaclass(
            MetaClassBuilder::new("db.Schema")
                .member(Member::string("name"))
                .build(),
        )
        .unwrap();
        rt.end_loading_metaclasses().unwrap();
        rt
    }

    #[test]
    fn test_allocate_default_members() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();

        assert_eq!(rt.get_member(table, "name").unwrap(), Value::from(""));
        assert_eq!(rt.get_member(table, "rowCount").unwrap(), Value::from(0));

        let columns = rt.get_member(table, "columns").unwrap().as_list().unwrap();
        assert_eq!(columns.count(), 0);
        assert_eq!(columns.content_type().object_class, "db.Column");
        assert_eq!(columns.owner(), Some(table));

        assert!(rt.get_member(table, "schema").unwrap().is_null());
        assert!(rt.object_guid(table).is_some());
    }

    #[test]
    fn test_allocate_unknown_class() {
        let rt = runtime_with_db_classes();
        assert!(matches!(
            rt.allocate("db.Missing"),
            Err(GrtError::BadClass(_))
        ));
    }

    #[test]
    fn test_set_member_type_checked() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();

        rt.set_member(table, "name", Value::from("customers")).unwrap();
        assert_eq!(
            rt.get_string_member(table, "name").unwrap(),
            "customers".to_string()
        );

        // wrong type rejected, member unchanged
        let err = rt.set_member(table, "name", Value::from(5)).unwrap_err();
        assert!(matches!(err, GrtError::Type { .. }));
        assert_eq!(rt.get_string_member(table, "name").unwrap(), "customers");

        // unknown member
        assert!(matches!(
            rt.set_member(table, "nope", Value::Null),
            Err(GrtError::BadItem(_))
        ));
    }

    #[test]
    fn test_readonly_and_container_members_reject_set() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();

        assert!(matches!(
            rt.set_member(table, "rowCount", Value::from(7)),
            Err(GrtError::ReadOnly(_))
        ));
        assert!(matches!(
            rt.set_member(table, "columns", Value::List(ListRef::new())),
            Err(GrtError::ReadOnly(_))
        ));
        // the unchecked variant may write read-only members
        rt.set_member_unchecked(table, "rowCount", Value::from(7)).unwrap();
        assert_eq!(rt.get_integer_member(table, "rowCount").unwrap(), 7);
    }

    #[test]
    fn test_object_member_class_checked() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();
        let schema = rt.allocate("db.Schema").unwrap();
        let column = rt.allocate("db.Column").unwrap();

        rt.set_member(table, "schema", Value::Object(schema)).unwrap();
        assert!(rt.set_member(table, "schema", Value::Object(column)).is_err());
        assert_eq!(
            rt.get_member(table, "schema").unwrap(),
            Value::Object(schema)
        );
    }

    #[test]
    fn test_owner_is_a_member() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();
        let column = rt.allocate("db.Column").unwrap();

        assert!(rt.get_member(column, "owner").unwrap().is_null());
        rt.set_member(column, "owner", Value::Object(table)).unwrap();
        assert_eq!(rt.owner(column), Some(table));
        assert_eq!(
            rt.get_member(column, "owner").unwrap(),
            Value::Object(table)
        );
        rt.set_member(column, "owner", Value::Null).unwrap();
        assert_eq!(rt.owner(column), None);
    }

    #[test]
    fn test_typed_list_member_enforces_class() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();
        let column = rt.allocate("db.Column").unwrap();
        let schema = rt.allocate("db.Schema").unwrap();

        let columns = rt.get_member(table, "columns").unwrap().as_list().unwrap();
        columns.insert(&rt, Value::Object(column)).unwrap();
        assert!(columns.insert(&rt, Value::Object(schema)).is_err());
        assert!(columns.insert(&rt, Value::from(1)).is_err());
        assert_eq!(columns.count(), 1);
    }

    #[test]
    fn test_change_events() {
        let rt = runtime_with_db_classes();
        let table = rt.allocate("db.Table").unwrap();
        let column = rt.allocate("db.Column").unwrap();

        let events = Arc::new(RwLock::new(Vec::new()));
        let sink = events.clone();
        rt.observe(Arc::new(move |e: &ChangeEvent| {
            sink.write().push(e.clone());
        }));

        rt.set_member(table, "name", Value::from("t1")).unwrap();
        let columns = rt.get_member(table, "columns").unwrap().as_list().unwrap();
        columns.insert(&rt, Value::Object(column)).unwrap();

        let events = events.read();
        assert!(events.contains(&ChangeEvent::MemberChanged {
            object: table,
            member: "name".to_string()
        }));
        assert!(events.contains(&ChangeEvent::ListItemAdded {
            object: table,
            member: "columns".to_string(),
            index: 0
        }));
    }

    #[test]
    fn test_message_handler_stack() {
        let rt = Runtime::new(RuntimeOptions::default());
        let seen = Arc::new(RwLock::new(Vec::new()));

        let sink = seen.clone();
        rt.push_message_handler(Arc::new(move |msg: &Message| {
            sink.write().push((msg.kind, msg.text.clone()));
            true
        }));

        rt.send_info("hello", "");
        rt.send_warning("careful", "detail");
        rt.pop_message_handler();
        rt.send_info("unseen", "");

        let seen = seen.read();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (MessageKind::Info, "hello".to_string()));
        assert_eq!(seen[1], (MessageKind::Warning, "careful".to_string()));
    }

    #[test]
    fn test_progress_steps_scale() {
        let rt = Runtime::new(RuntimeOptions::default());
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        rt.push_message_handler(Arc::new(move |msg: &Message| {
            if msg.kind == MessageKind::Progress {
                sink.write().push(msg.progress);
            }
            true
        }));

        rt.begin_progress_step(0.5, 1.0);
        rt.send_progress(0.5, "half of the second half", "");
        rt.end_progress_step();
        rt.send_progress(0.25, "quarter overall", "");

        let seen = seen.read();
        assert!((seen[0] - 0.75).abs() < 1e-6);
        assert!((seen[1] - 0.25).abs() < 1e-6);
    }
}
