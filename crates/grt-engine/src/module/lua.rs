//! Lua module loader
//!
//! Loads `.lua` module files. A module file returns a table:
//!
//! ```lua
//! return {
//!   name = "LuaDemo",
//!   version = "1.0",
//!   author = "...",
//!   description = "...",
//!   implements = { "SomeInterface" },
//!   functions = {
//!     { name = "add", ret = "int",
//!       args = { { "a", "int" }, { "b", "int" } },
//!       impl = function(a, b) return a + b end },
//!   },
//! }
//! ```
//!
//! Type tags use the same string encoding as every other loader (`"int"`,
//! `"double"`, `"string"`, `"list"`, `"dict"`, `"object"`); container and
//! object types pair the tag with a content spec or class name, e.g.
//! `{ "list", "int" }` or `{ "object", "db.Table" }`.
//!
//! GRT lists, dicts, and objects surface to Lua as userdata wrappers that
//! reference the underlying GRT containers - mutations through the wrapper
//! mutate the GRT value. Lua code signals typed failures through the
//! injected `grt.error(kind, message)` helper; any other Lua error becomes
//! a module error carrying the formatted Lua message.

use std::path::Path;
use std::sync::{Arc, Weak};

use mlua::{Lua, MetaMethod, RegistryKey, UserData, UserDataMethods};
use parking_lot::Mutex;

use grt_sdk::{ArgSpec, FunctionSignature, GrtError, GrtResult, ModuleInfo, SimpleTypeSpec, Type, TypeSpec};

use super::{validate_args, Function, FunctionImpl, Module, ModuleLoader};
use crate::interp::InterpreterGate;
use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::{DictRef, ListRef, Value};

const ERROR_MARKER: &str = "GRTERROR:";

/// Loader for modules implemented in Lua
pub struct LuaModuleLoader {
    runtime: Weak<Runtime>,
    lua: Arc<Mutex<Lua>>,
    gate: Arc<InterpreterGate>,
}

impl LuaModuleLoader {
    /// Create a loader bound to a runtime, with a fresh Lua state
    pub fn new(runtime: &Arc<Runtime>) -> GrtResult<Self> {
        let lua = Lua::new();
        install_grt_helpers(&lua).map_err(|e| lua_to_grt_error("initializing Lua state", &e))?;
        Ok(LuaModuleLoader {
            runtime: Arc::downgrade(runtime),
            lua: Arc::new(Mutex::new(lua)),
            gate: Arc::new(InterpreterGate::new()),
        })
    }

    /// The gate serializing entry into this loader's interpreter
    pub fn gate(&self) -> &Arc<InterpreterGate> {
        &self.gate
    }
}

fn install_grt_helpers(lua: &Lua) -> mlua::Result<()> {
    let grt = lua.create_table()?;
    // grt.error(kind, message) raises a tagged error that the call
    // boundary translates into the matching typed GRT error
    let error_fn = lua.create_function(|_, (kind, message): (String, String)| {
        Err::<(), mlua::Error>(mlua::Error::RuntimeError(format!(
            "{ERROR_MARKER}{kind}:{message}"
        )))
    })?;
    grt.set("error", error_fn)?;
    lua.globals().set("grt", grt)?;
    Ok(())
}

fn lua_to_grt_error(context: &str, err: &mlua::Error) -> GrtError {
    let text = err.to_string();
    if let Some(pos) = text.find(ERROR_MARKER) {
        let tagged = &text[pos + ERROR_MARKER.len()..];
        let (kind, message) = match tagged.split_once(':') {
            Some((kind, rest)) => (kind, rest.lines().next().unwrap_or("").to_string()),
            None => (tagged.lines().next().unwrap_or(""), String::new()),
        };
        return match kind {
            "user_cancelled" => GrtError::UserCancelled(message),
            "db_access_denied" => GrtError::DbAccessDenied(message),
            "db_login_error" => GrtError::DbLoginError(message),
            _ => GrtError::module_with_inner(context.to_string(), message),
        };
    }
    GrtError::module_with_inner(context.to_string(), text)
}

fn runtime_of(weak: &Weak<Runtime>) -> mlua::Result<Arc<Runtime>> {
    weak.upgrade()
        .ok_or_else(|| mlua::Error::RuntimeError("GRT runtime is gone".to_string()))
}

// ============================================================================
// Userdata wrappers
// ============================================================================

struct LuaGrtList {
    runtime: Weak<Runtime>,
    list: ListRef,
}

impl UserData for LuaGrtList {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("count", |_, this, ()| Ok(this.list.count()));
        methods.add_method("get", |lua, this, index: usize| {
            let rt = runtime_of(&this.runtime)?;
            // Lua indexes are 1-based
            let value = this
                .list
                .get(index.saturating_sub(1))
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            grt_to_lua(&rt, lua, &value)
        });
        methods.add_method("insert", |lua, this, value: mlua::Value| {
            let rt = runtime_of(&this.runtime)?;
            let value = lua_to_grt(&rt, lua, &value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            this.list
                .insert(&rt, value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        });
        methods.add_method("remove", |_, this, index: usize| {
            let rt = runtime_of(&this.runtime)?;
            this.list
                .remove(&rt, index.saturating_sub(1))
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        });
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.list.count()));
    }
}

struct LuaGrtDict {
    runtime: Weak<Runtime>,
    dict: DictRef,
}

impl UserData for LuaGrtDict {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("count", |_, this, ()| Ok(this.dict.count()));
        methods.add_method("has_key", |_, this, key: String| Ok(this.dict.has_key(&key)));
        methods.add_method("keys", |_, this, ()| Ok(this.dict.keys()));
        methods.add_method("get", |lua, this, key: String| {
            let rt = runtime_of(&this.runtime)?;
            match this.dict.get_opt(&key) {
                Some(value) => grt_to_lua(&rt, lua, &value),
                None => Ok(mlua::Value::Nil),
            }
        });
        methods.add_method("set", |lua, this, (key, value): (String, mlua::Value)| {
            let rt = runtime_of(&this.runtime)?;
            let value = lua_to_grt(&rt, lua, &value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            this.dict
                .set(&rt, &key, value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        });
        methods.add_method("remove", |_, this, key: String| {
            let rt = runtime_of(&this.runtime)?;
            this.dict.remove(&rt, &key);
            Ok(())
        });
    }
}

struct LuaGrtObject {
    runtime: Weak<Runtime>,
    object: ObjectId,
}

impl UserData for LuaGrtObject {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("class_name", |_, this, ()| {
            let rt = runtime_of(&this.runtime)?;
            Ok(rt.object_class_name(this.object).unwrap_or_default())
        });
        methods.add_method("id", |_, this, ()| {
            let rt = runtime_of(&this.runtime)?;
            Ok(rt.object_guid(this.object).unwrap_or_default())
        });
        methods.add_method("get", |lua, this, member: String| {
            let rt = runtime_of(&this.runtime)?;
            let value = rt
                .get_member(this.object, &member)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            grt_to_lua(&rt, lua, &value)
        });
        // member sets run through the full metaclass validation: readonly
        // members and type mismatches surface as Lua errors
        methods.add_method("set", |lua, this, (member, value): (String, mlua::Value)| {
            let rt = runtime_of(&this.runtime)?;
            let value = lua_to_grt(&rt, lua, &value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
            rt.set_member(this.object, &member, value)
                .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        });
    }
}

// ============================================================================
// Marshaling
// ============================================================================

fn grt_to_lua(rt: &Arc<Runtime>, lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    match value {
        Value::Null => Ok(mlua::Value::Nil),
        Value::Integer(i) => Ok(mlua::Value::Integer(*i)),
        Value::Double(d) => Ok(mlua::Value::Number(*d)),
        Value::String(s) => Ok(mlua::Value::String(lua.create_string(s.as_ref())?)),
        Value::List(list) => {
            let wrapper = LuaGrtList {
                runtime: Arc::downgrade(rt),
                list: list.clone(),
            };
            Ok(mlua::Value::UserData(lua.create_userdata(wrapper)?))
        }
        Value::Dict(dict) => {
            let wrapper = LuaGrtDict {
                runtime: Arc::downgrade(rt),
                dict: dict.clone(),
            };
            Ok(mlua::Value::UserData(lua.create_userdata(wrapper)?))
        }
        Value::Object(object) => {
            let wrapper = LuaGrtObject {
                runtime: Arc::downgrade(rt),
                object: *object,
            };
            Ok(mlua::Value::UserData(lua.create_userdata(wrapper)?))
        }
    }
}

fn lua_to_grt(rt: &Arc<Runtime>, lua: &Lua, value: &mlua::Value) -> GrtResult<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Integer(*b as i64)),
        mlua::Value::Integer(i) => Ok(Value::Integer(*i)),
        mlua::Value::Number(n) => Ok(Value::Double(*n)),
        mlua::Value::String(s) => Ok(Value::from(
            s.to_str()
                .map_err(|e| GrtError::type_mismatch("string", e.to_string()))?
                .as_ref(),
        )),
        mlua::Value::Table(table) => {
            // a pure sequence becomes a list, anything else a dict
            let len = table.raw_len();
            let mut map_entries = 0usize;
            for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair.map_err(|e| lua_to_grt_error("reading table", &e))?;
                if !matches!(key, mlua::Value::Integer(_)) {
                    map_entries += 1;
                }
            }
            if map_entries == 0 {
                let list = ListRef::new();
                for i in 1..=len {
                    let item: mlua::Value = table
                        .get(i)
                        .map_err(|e| lua_to_grt_error("reading table", &e))?;
                    list.insert(rt, lua_to_grt(rt, lua, &item)?)?;
                }
                Ok(Value::List(list))
            } else {
                let dict = DictRef::new();
                for pair in table.clone().pairs::<String, mlua::Value>() {
                    let (key, item) = pair.map_err(|e| lua_to_grt_error("reading table", &e))?;
                    dict.set(rt, &key, lua_to_grt(rt, lua, &item)?)?;
                }
                Ok(Value::Dict(dict))
            }
        }
        mlua::Value::UserData(ud) => {
            if let Ok(list) = ud.borrow::<LuaGrtList>() {
                return Ok(Value::List(list.list.clone()));
            }
            if let Ok(dict) = ud.borrow::<LuaGrtDict>() {
                return Ok(Value::Dict(dict.dict.clone()));
            }
            if let Ok(object) = ud.borrow::<LuaGrtObject>() {
                return Ok(Value::Object(object.object));
            }
            Err(GrtError::type_mismatch("GRT value", "foreign userdata"))
        }
        other => Err(GrtError::type_mismatch("GRT value", other.type_name())),
    }
}

// ============================================================================
// Type spec parsing
// ============================================================================

fn parse_lua_type(value: &mlua::Value) -> GrtResult<TypeSpec> {
    match value {
        mlua::Value::String(tag) => {
            let tag = tag.to_string_lossy().to_string();
            let base = Type::from_tag(&tag);
            if base == Type::Any && tag != "any" {
                return Err(GrtError::module(format!("Invalid type specification '{tag}'")));
            }
            Ok(TypeSpec::of(base))
        }
        mlua::Value::Table(pair) => {
            let head: String = pair
                .get(1)
                .map_err(|_| GrtError::module("Invalid type specification"))?;
            let base = Type::from_tag(&head);
            match base {
                Type::Object => {
                    let class: String = pair
                        .get(2)
                        .map_err(|_| GrtError::module("Invalid object type specification"))?;
                    Ok(TypeSpec::object(class))
                }
                Type::List | Type::Dict => {
                    let content: mlua::Value = pair
                        .get(2)
                        .map_err(|_| GrtError::module("Invalid type specification"))?;
                    let content = match &content {
                        mlua::Value::Nil => SimpleTypeSpec::default(),
                        other => parse_lua_type(other)?.base,
                    };
                    if base == Type::List {
                        Ok(TypeSpec::list_of(content))
                    } else {
                        Ok(TypeSpec::dict_of(content))
                    }
                }
                _ => Err(GrtError::module(
                    "Invalid type specification. Pair must be (<container type>, <content type>)",
                )),
            }
        }
        _ => Err(GrtError::module("Invalid type specification")),
    }
}

// ============================================================================
// Loader
// ============================================================================

impl LuaModuleLoader {
    fn build_module(&self, path: &Path) -> GrtResult<Module> {
        let _lock = self.gate.enter();
        let lua = self.lua.lock();

        let code = std::fs::read_to_string(path)
            .map_err(|e| GrtError::os(format!("reading {}", path.display()), &e))?;
        let table: mlua::Table = lua
            .load(&code)
            .set_name(path.display().to_string())
            .eval()
            .map_err(|e| lua_to_grt_error(&format!("Error loading Lua module {}", path.display()), &e))?;

        let name: String = table.get("name").map_err(|_| {
            GrtError::module("module table incorrectly defined (name field missing)")
        })?;

        let mut info = ModuleInfo::new(name, table.get::<String>("version").unwrap_or_default());
        info.author = table.get::<String>("author").unwrap_or_default();
        info.description = table.get::<String>("description").unwrap_or_default();
        if let Ok(implements) = table.get::<Vec<String>>("implements") {
            info.implements = implements;
        }

        let mut module = Module::new(info, "lua");
        module.set_path(path);

        let functions: mlua::Table = table
            .get("functions")
            .map_err(|_| GrtError::module("module table has no functions list"))?;
        for entry in functions.sequence_values::<mlua::Table>() {
            let entry = entry.map_err(|e| lua_to_grt_error("Invalid module function entry", &e))?;
            let fname: String = entry
                .get("name")
                .map_err(|_| GrtError::module("Invalid module function entry (name missing)"))?;
            let ret: mlua::Value = entry
                .get("ret")
                .map_err(|_| GrtError::module("Invalid module function entry (ret missing)"))?;
            let ret_type = match &ret {
                mlua::Value::Nil => TypeSpec::default(),
                other => parse_lua_type(other).map_err(|e| {
                    GrtError::module(format!(
                        "Invalid return type specification in {}.{fname}: {e}",
                        module.name()
                    ))
                })?,
            };

            let mut arg_types = Vec::new();
            if let Ok(args) = entry.get::<mlua::Table>("args") {
                for spec in args.sequence_values::<mlua::Table>() {
                    let spec =
                        spec.map_err(|e| lua_to_grt_error("Invalid argument specification", &e))?;
                    let label: String = spec.get(1).unwrap_or_default();
                    let arg_type: mlua::Value = spec
                        .get(2)
                        .map_err(|_| GrtError::module("Invalid argument type specification"))?;
                    arg_types.push(ArgSpec {
                        name: label,
                        type_: parse_lua_type(&arg_type).map_err(|e| {
                            GrtError::module(format!(
                                "Invalid argument type specification in {}.{fname}: {e}",
                                module.name()
                            ))
                        })?,
                    });
                }
            }

            let callable: mlua::Function = entry
                .get("impl")
                .map_err(|_| GrtError::module(format!("function {fname} has no impl")))?;
            let key = lua
                .create_registry_value(callable)
                .map_err(|e| lua_to_grt_error("registering Lua function", &e))?;

            let signature = FunctionSignature {
                name: fname,
                description: String::new(),
                ret_type,
                arg_types,
            };
            module.add_function(Function::new(
                signature.clone(),
                self.make_call_wrapper(signature, key, module.name().to_string()),
            ));
        }

        Ok(module)
    }

    fn make_call_wrapper(
        &self,
        signature: FunctionSignature,
        key: RegistryKey,
        module_name: String,
    ) -> FunctionImpl {
        let lua = self.lua.clone();
        let gate = self.gate.clone();
        let weak_rt = self.runtime.clone();

        Box::new(move |rt: &Runtime, args: &ListRef| {
            // argument count and types are checked before crossing into Lua
            validate_args(rt, &signature, args)?;

            let strong_rt = weak_rt
                .upgrade()
                .ok_or_else(|| GrtError::module("GRT runtime is gone"))?;

            // entering the interpreter holds the gate for the duration of
            // the call; Lua-side callbacks into blocking native code go
            // through ScopedInterpreterLock::unlocked
            let _lock = gate.enter();
            let lua = lua.lock();

            let function: mlua::Function = lua.registry_value(&key).map_err(|e| {
                lua_to_grt_error(
                    &format!("error calling Lua module function {module_name}.{}", signature.name),
                    &e,
                )
            })?;

            let mut lua_args = Vec::with_capacity(args.count());
            for value in args.items() {
                lua_args.push(
                    grt_to_lua(&strong_rt, &lua, &value)
                        .map_err(|e| lua_to_grt_error("marshaling arguments", &e))?,
                );
            }

            let result: mlua::Value = function
                .call(mlua::MultiValue::from_vec(lua_args))
                .map_err(|e| {
                    lua_to_grt_error(
                        &format!(
                            "error calling Lua module function {module_name}.{}",
                            signature.name
                        ),
                        &e,
                    )
                })?;

            let result = lua_to_grt(&strong_rt, &lua, &result)?;
            // coerce numeric results to the declared return type
            let result = match (&result, signature.ret_type.base.type_) {
                (Value::Integer(i), Type::Double) => Value::Double(*i as f64),
                (Value::Double(d), Type::Integer) => Value::Integer(*d as i64),
                _ => result,
            };
            if !result.is_null() {
                strong_rt.check_type(&signature.ret_type, &result)?;
            }
            Ok(result)
        })
    }
}

impl ModuleLoader for LuaModuleLoader {
    fn loader_name(&self) -> &str {
        "lua"
    }

    fn check_file_extension(&self, path: &Path) -> bool {
        path.extension().map(|e| e == "lua").unwrap_or(false)
    }

    fn init_module(&self, path: &Path) -> GrtResult<Module> {
        self.build_module(path)
    }

    fn run_script_file(&self, path: &Path) -> GrtResult<()> {
        let code = std::fs::read_to_string(path)
            .map_err(|e| GrtError::os(format!("reading {}", path.display()), &e))?;
        self.run_script(&code)
    }

    fn run_script(&self, script: &str) -> GrtResult<()> {
        let _lock = self.gate.enter();
        let lua = self.lua.lock();
        lua.load(script)
            .exec()
            .map_err(|e| lua_to_grt_error("running Lua script", &e))
    }
}
