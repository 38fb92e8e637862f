//! Python module loader
//!
//! Loads `.py` module files through an embedded CPython interpreter. A
//! module file defines `ModuleInfo`:
//!
//! ```python
//! import grt
//!
//! def add(a, b):
//!     return a + b
//!
//! ModuleInfo = {
//!     "name": "PyDemo",
//!     "version": "1.0",
//!     "author": "...",
//!     "description": "...",
//!     "implements": ["SomeInterface"],
//!     "functions": [
//!         ("add", ("int", [("a", "int"), ("b", "int")]), add),
//!     ],
//! }
//! ```
//!
//! Type tags use the shared string encoding (`"int"`, `"double"`,
//! `"string"`, `"list"`, `"dict"`, `"object"`); container and object types
//! pair the tag with a content spec or class name, e.g. `("list", "int")`
//! or `("object", "db.Table")`.
//!
//! The call path validates argument count and per-argument types against
//! the declared specs before invoking the callable. Interpreter-side
//! exceptions are translated by exception class identity: `grt.UserCancelled`,
//! `grt.DBAccessDenied` and `grt.DBLoginError` map onto the corresponding
//! typed GRT errors, anything else becomes a module error carrying the
//! formatted Python exception. GRT lists, dicts, and objects surface to
//! Python as wrapper classes referencing the underlying GRT containers.

use std::ffi::CString;
use std::path::Path;
use std::sync::{Arc, Weak};

use pyo3::exceptions::{PyAttributeError, PyIndexError, PyKeyError, PyRuntimeError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule, PyTuple};

use grt_sdk::{ArgSpec, FunctionSignature, GrtError, GrtResult, ModuleInfo, SimpleTypeSpec, Type, TypeSpec};

use super::{validate_args, Function, FunctionImpl, Module, ModuleLoader};
use crate::interp::InterpreterGate;
use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::{DictRef, ListRef, Value};

pyo3::create_exception!(grt, UserCancelled, pyo3::exceptions::PyException);
pyo3::create_exception!(grt, DBAccessDenied, pyo3::exceptions::PyException);
pyo3::create_exception!(grt, DBLoginError, pyo3::exceptions::PyException);

/// Loader for modules implemented in Python
pub struct PythonModuleLoader {
    runtime: Weak<Runtime>,
    gate: Arc<InterpreterGate>,
}

impl PythonModuleLoader {
    /// Create a loader bound to a runtime, initializing the interpreter
    /// and installing the `grt` helper module.
    pub fn new(runtime: &Arc<Runtime>) -> GrtResult<Self> {
        Python::with_gil(|py| install_grt_module(py))
            .map_err(|e| GrtError::module_with_inner("initializing Python", e.to_string()))?;
        Ok(PythonModuleLoader {
            runtime: Arc::downgrade(runtime),
            gate: Arc::new(InterpreterGate::new()),
        })
    }

    /// The gate serializing entry into the interpreter
    pub fn gate(&self) -> &Arc<InterpreterGate> {
        &self.gate
    }

    /// Add a directory to the interpreter's module search path
    pub fn add_module_path(&self, path: &Path) -> GrtResult<()> {
        let _lock = self.gate.enter();
        Python::with_gil(|py| -> PyResult<()> {
            let sys_path = py.import("sys")?.getattr("path")?;
            let sys_path = sys_path.downcast_into::<PyList>()?;
            let entry = path.display().to_string();
            for existing in sys_path.iter() {
                if existing.extract::<String>().ok().as_deref() == Some(entry.as_str()) {
                    return Ok(());
                }
            }
            sys_path.append(entry)
        })
        .map_err(|e| GrtError::module_with_inner("extending sys.path", e.to_string()))
    }
}

fn install_grt_module(py: Python<'_>) -> PyResult<()> {
    let sys_modules = py.import("sys")?.getattr("modules")?;
    if sys_modules.contains("grt")? {
        return Ok(());
    }
    let module = PyModule::new(py, "grt")?;
    module.add("UserCancelled", py.get_type::<UserCancelled>())?;
    module.add("DBAccessDenied", py.get_type::<DBAccessDenied>())?;
    module.add("DBLoginError", py.get_type::<DBLoginError>())?;
    module.add_class::<PyGrtList>()?;
    module.add_class::<PyGrtDict>()?;
    module.add_class::<PyGrtObject>()?;
    sys_modules.set_item("grt", module)?;
    Ok(())
}

fn runtime_of(weak: &Weak<Runtime>) -> PyResult<Arc<Runtime>> {
    weak.upgrade()
        .ok_or_else(|| PyRuntimeError::new_err("GRT runtime is gone"))
}

fn grt_err_to_py(err: GrtError) -> PyErr {
    match &err {
        GrtError::Type { .. } => PyTypeError::new_err(err.to_string()),
        GrtError::ReadOnly(_) => PyAttributeError::new_err(err.to_string()),
        GrtError::BadItem(_) => PyKeyError::new_err(err.to_string()),
        GrtError::BadIndex { .. } => PyIndexError::new_err(err.to_string()),
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

// ============================================================================
// Wrapper classes
// ============================================================================

/// Python-side view of a GRT list; mutations write through to the
/// underlying container.
#[pyclass(name = "List")]
struct PyGrtList {
    runtime: Weak<Runtime>,
    list: ListRef,
}

#[pymethods]
impl PyGrtList {
    fn __len__(&self) -> usize {
        self.list.count()
    }

    fn __getitem__(&self, py: Python<'_>, index: usize) -> PyResult<PyObject> {
        let rt = runtime_of(&self.runtime)?;
        let value = self.list.get(index).map_err(grt_err_to_py)?;
        grt_to_py(&rt, py, &value)
    }

    fn __setitem__(&self, index: usize, value: Bound<'_, PyAny>) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        let value = py_to_grt(&rt, &value)?;
        self.list.set(&rt, index, value).map_err(grt_err_to_py)
    }

    fn append(&self, value: Bound<'_, PyAny>) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        let value = py_to_grt(&rt, &value)?;
        self.list.insert(&rt, value).map_err(grt_err_to_py)
    }

    fn remove(&self, index: usize) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        self.list.remove(&rt, index).map_err(grt_err_to_py)
    }
}

/// Python-side view of a GRT dict; mutations write through
#[pyclass(name = "Dict")]
struct PyGrtDict {
    runtime: Weak<Runtime>,
    dict: DictRef,
}

#[pymethods]
impl PyGrtDict {
    fn __len__(&self) -> usize {
        self.dict.count()
    }

    fn __contains__(&self, key: &str) -> bool {
        self.dict.has_key(key)
    }

    fn __getitem__(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        let rt = runtime_of(&self.runtime)?;
        let value = self.dict.get(key).map_err(grt_err_to_py)?;
        grt_to_py(&rt, py, &value)
    }

    fn __setitem__(&self, key: &str, value: Bound<'_, PyAny>) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        let value = py_to_grt(&rt, &value)?;
        self.dict.set(&rt, key, value).map_err(grt_err_to_py)
    }

    fn __delitem__(&self, key: &str) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        self.dict.remove(&rt, key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.dict.keys()
    }
}

/// Python-side proxy of a GRT object exposing member get/set.
///
/// Member sets run through the full metaclass validation: readonly
/// members raise `AttributeError`, type mismatches raise `TypeError`.
#[pyclass(name = "Object")]
struct PyGrtObject {
    runtime: Weak<Runtime>,
    object: ObjectId,
}

#[pymethods]
impl PyGrtObject {
    fn class_name(&self) -> PyResult<String> {
        let rt = runtime_of(&self.runtime)?;
        Ok(rt.object_class_name(self.object).unwrap_or_default())
    }

    fn id(&self) -> PyResult<String> {
        let rt = runtime_of(&self.runtime)?;
        Ok(rt.object_guid(self.object).unwrap_or_default())
    }

    fn get_member(&self, py: Python<'_>, member: &str) -> PyResult<PyObject> {
        let rt = runtime_of(&self.runtime)?;
        let value = rt.get_member(self.object, member).map_err(grt_err_to_py)?;
        grt_to_py(&rt, py, &value)
    }

    fn set_member(&self, member: &str, value: Bound<'_, PyAny>) -> PyResult<()> {
        let rt = runtime_of(&self.runtime)?;
        let value = py_to_grt(&rt, &value)?;
        rt.set_member(self.object, member, value).map_err(grt_err_to_py)
    }

    fn call_method(&self, py: Python<'_>, method: &str, args: Bound<'_, PyAny>) -> PyResult<PyObject> {
        let rt = runtime_of(&self.runtime)?;
        let grt_args = match py_to_grt(&rt, &args)? {
            Value::List(list) => list,
            Value::Null => ListRef::new(),
            other => {
                return Err(PyTypeError::new_err(format!(
                    "method arguments must be a list, got {}",
                    other.type_name()
                )))
            }
        };
        let result = rt
            .call_method(self.object, method, &grt_args)
            .map_err(grt_err_to_py)?;
        grt_to_py(&rt, py, &result)
    }
}

// ============================================================================
// Marshaling
// ============================================================================

fn grt_to_py(rt: &Arc<Runtime>, py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    match value {
        Value::Null => Ok(py.None()),
        Value::Integer(i) => Ok(i.into_pyobject(py)?.into_any().unbind()),
        Value::Double(d) => Ok(d.into_pyobject(py)?.into_any().unbind()),
        Value::String(s) => Ok(s.as_ref().into_pyobject(py)?.into_any().unbind()),
        Value::List(list) => {
            let wrapper = PyGrtList {
                runtime: Arc::downgrade(rt),
                list: list.clone(),
            };
            Ok(Py::new(py, wrapper)?.into_any())
        }
        Value::Dict(dict) => {
            let wrapper = PyGrtDict {
                runtime: Arc::downgrade(rt),
                dict: dict.clone(),
            };
            Ok(Py::new(py, wrapper)?.into_any())
        }
        Value::Object(object) => {
            let wrapper = PyGrtObject {
                runtime: Arc::downgrade(rt),
                object: *object,
            };
            Ok(Py::new(py, wrapper)?.into_any())
        }
    }
}

fn py_to_grt(rt: &Arc<Runtime>, value: &Bound<'_, PyAny>) -> PyResult<Value> {
    if value.is_none() {
        return Ok(Value::Null);
    }
    if let Ok(wrapper) = value.downcast::<PyGrtList>() {
        return Ok(Value::List(wrapper.borrow().list.clone()));
    }
    if let Ok(wrapper) = value.downcast::<PyGrtDict>() {
        return Ok(Value::Dict(wrapper.borrow().dict.clone()));
    }
    if let Ok(wrapper) = value.downcast::<PyGrtObject>() {
        return Ok(Value::Object(wrapper.borrow().object));
    }
    if let Ok(b) = value.extract::<bool>() {
        // bool before int: Python bool is an int subtype
        return Ok(Value::Integer(b as i64));
    }
    if let Ok(i) = value.extract::<i64>() {
        return Ok(Value::Integer(i));
    }
    if let Ok(d) = value.extract::<f64>() {
        return Ok(Value::Double(d));
    }
    if let Ok(s) = value.extract::<String>() {
        return Ok(Value::from(s));
    }
    if let Ok(list) = value.downcast::<PyList>() {
        let out = ListRef::new();
        for item in list.iter() {
            let item = py_to_grt(rt, &item)?;
            out.insert(rt, item).map_err(grt_err_to_py)?;
        }
        return Ok(Value::List(out));
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        let out = DictRef::new();
        for (key, item) in dict.iter() {
            let key = key.extract::<String>()?;
            let item = py_to_grt(rt, &item)?;
            out.set(rt, &key, item).map_err(grt_err_to_py)?;
        }
        return Ok(Value::Dict(out));
    }
    Err(PyTypeError::new_err(format!(
        "cannot convert {} to a GRT value",
        value.get_type().name()?
    )))
}

// ============================================================================
// Type spec parsing
// ============================================================================

fn parse_py_type(value: &Bound<'_, PyAny>) -> GrtResult<TypeSpec> {
    if let Ok(tag) = value.extract::<String>() {
        let base = Type::from_tag(&tag);
        if base == Type::Any && tag != "any" {
            return Err(GrtError::module(format!("Invalid type specification '{tag}'")));
        }
        return Ok(TypeSpec::of(base));
    }
    if let Ok((head, content)) = value.extract::<(String, Bound<'_, PyAny>)>() {
        let base = Type::from_tag(&head);
        return match base {
            Type::Object => {
                let class = content.extract::<String>().map_err(|_| {
                    GrtError::module("Invalid object type specification")
                })?;
                Ok(TypeSpec::object(class))
            }
            Type::List | Type::Dict => {
                let content = if let Ok(tag) = content.extract::<String>() {
                    SimpleTypeSpec::of(Type::from_tag(&tag))
                } else if let Ok((otag, class)) = content.extract::<(String, String)>() {
                    if Type::from_tag(&otag) != Type::Object {
                        return Err(GrtError::module("Invalid type specification"));
                    }
                    SimpleTypeSpec::object(class)
                } else {
                    return Err(GrtError::module("Invalid type specification"));
                };
                if base == Type::List {
                    Ok(TypeSpec::list_of(content))
                } else {
                    Ok(TypeSpec::dict_of(content))
                }
            }
            _ => Err(GrtError::module(
                "Invalid type specification. Tuple must be in form (<container type>, <content type>)",
            )),
        };
    }
    Err(GrtError::module("Invalid type specification"))
}

// ============================================================================
// Loader
// ============================================================================

fn format_py_error(py: Python<'_>, err: &PyErr) -> String {
    let ename = err
        .get_type(py)
        .name()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "???".to_string());
    let evalue = err.value(py).to_string();
    format!("{ename}(\"{evalue}\")")
}

fn translate_py_error(py: Python<'_>, err: PyErr, context: &str) -> GrtError {
    if err.is_instance_of::<UserCancelled>(py) {
        let what = err.value(py).to_string();
        return GrtError::UserCancelled(if what.is_empty() {
            "Interrupted by user".to_string()
        } else {
            what
        });
    }
    if err.is_instance_of::<DBAccessDenied>(py) {
        let what = err.value(py).to_string();
        return GrtError::DbAccessDenied(if what.is_empty() {
            "Access denied".to_string()
        } else {
            what
        });
    }
    if err.is_instance_of::<DBLoginError>(py) {
        let what = err.value(py).to_string();
        return GrtError::DbLoginError(if what.is_empty() {
            "Login error, check username and password".to_string()
        } else {
            what
        });
    }
    GrtError::module_with_inner(context.to_string(), format_py_error(py, &err))
}

impl PythonModuleLoader {
    fn build_module(&self, path: &Path) -> GrtResult<Module> {
        let _lock = self.gate.enter();

        let code = std::fs::read_to_string(path)
            .map_err(|e| GrtError::os(format!("reading {}", path.display()), &e))?;
        let module_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Python::with_gil(|py| -> GrtResult<Module> {
            let code = CString::new(code)
                .map_err(|_| GrtError::module("module source contains NUL bytes"))?;
            let file_name = CString::new(path.display().to_string())
                .map_err(|_| GrtError::module("module path contains NUL bytes"))?;
            let name = CString::new(module_name.clone())
                .map_err(|_| GrtError::module("module name contains NUL bytes"))?;

            let py_module = PyModule::from_code(py, &code, &file_name, &name).map_err(|e| {
                translate_py_error(
                    py,
                    e,
                    &format!("Error importing Python module {}", path.display()),
                )
            })?;

            let module_info = py_module.getattr("ModuleInfo").map_err(|_| {
                GrtError::module(format!(
                    "Python module {} does not define ModuleInfo",
                    path.display()
                ))
            })?;
            let module_info = module_info.downcast::<PyDict>().map_err(|_| {
                GrtError::module("ModuleInfo is not a dict")
            })?;

            let get_str = |key: &str| -> Option<String> {
                module_info
                    .get_item(key)
                    .ok()
                    .flatten()
                    .and_then(|v| v.extract::<String>().ok())
            };

            let name = get_str("name").ok_or_else(|| {
                GrtError::module("ModuleInfo incorrectly defined (name attribute missing)")
            })?;
            let mut info = ModuleInfo::new(name, get_str("version").unwrap_or_default());
            info.author = get_str("author").unwrap_or_default();
            info.description = get_str("description").unwrap_or_default();

            if let Ok(Some(implements)) = module_info.get_item("implements") {
                info.implements = implements
                    .extract::<Vec<String>>()
                    .map_err(|_| GrtError::module("Invalid value for 'implements' list"))?;
            }

            let mut module = Module::new(info, "python");
            module.set_path(path);

            let functions = module_info
                .get_item("functions")
                .ok()
                .flatten()
                .ok_or_else(|| GrtError::module("ModuleInfo has no functions list"))?;

            for item in functions.try_iter().map_err(|e| {
                translate_py_error(py, e, "Invalid module function specification")
            })? {
                let item = item.map_err(|e| {
                    translate_py_error(py, e, "Invalid module function specification")
                })?;
                let (fname, (ret, arg_specs), callable) = item
                    .extract::<(String, (Bound<'_, PyAny>, Bound<'_, PyAny>), Bound<'_, PyAny>)>()
                    .map_err(|_| {
                        GrtError::module(format!(
                            "Invalid module function specification in {}",
                            path.display()
                        ))
                    })?;

                let ret_type = parse_py_type(&ret).map_err(|e| {
                    GrtError::module(format!(
                        "Invalid return type specification in {}.{fname}: {e}",
                        module.name()
                    ))
                })?;

                let mut arg_types = Vec::new();
                for spec in arg_specs.try_iter().map_err(|e| {
                    translate_py_error(py, e, "Invalid argument specification")
                })? {
                    let spec = spec.map_err(|e| {
                        translate_py_error(py, e, "Invalid argument specification")
                    })?;
                    let (label, type_spec) = spec
                        .extract::<(String, Bound<'_, PyAny>)>()
                        .map_err(|_| {
                            GrtError::module(
                                "Invalid argument specification (argument spec must be a list of tuples)",
                            )
                        })?;
                    arg_types.push(ArgSpec {
                        name: label,
                        type_: parse_py_type(&type_spec).map_err(|_| {
                            GrtError::module(format!(
                                "Invalid argument type specification in {}.{fname}",
                                module.name()
                            ))
                        })?,
                    });
                }

                let description = callable
                    .getattr("__doc__")
                    .ok()
                    .and_then(|d| d.extract::<String>().ok())
                    .unwrap_or_default();

                let signature = FunctionSignature {
                    name: fname,
                    description,
                    ret_type,
                    arg_types,
                };
                module.add_function(Function::new(
                    signature.clone(),
                    self.make_call_wrapper(signature, callable.unbind(), module.name().to_string()),
                ));
            }

            Ok(module)
        })
    }

    fn make_call_wrapper(
        &self,
        signature: FunctionSignature,
        callable: Py<PyAny>,
        module_name: String,
    ) -> FunctionImpl {
        let gate = self.gate.clone();
        let weak_rt = self.runtime.clone();

        Box::new(move |rt: &Runtime, args: &ListRef| {
            // argument count and per-argument types are validated against
            // the declared specs before entering the interpreter
            validate_args(rt, &signature, args)?;

            let strong_rt = weak_rt
                .upgrade()
                .ok_or_else(|| GrtError::module("GRT runtime is gone"))?;

            let _lock = gate.enter();
            Python::with_gil(|py| -> GrtResult<Value> {
                let mut py_args = Vec::with_capacity(args.count());
                for value in args.items() {
                    py_args.push(grt_to_py(&strong_rt, py, &value).map_err(|e| {
                        translate_py_error(py, e, "marshaling arguments")
                    })?);
                }
                let tuple = PyTuple::new(py, py_args)
                    .map_err(|e| translate_py_error(py, e, "marshaling arguments"))?;

                let context = format!(
                    "error calling Python module function {module_name}.{}",
                    signature.name
                );
                let result = callable
                    .bind(py)
                    .call1(tuple)
                    .map_err(|e| translate_py_error(py, e, &context))?;

                let result = py_to_grt(&strong_rt, &result)
                    .map_err(|e| translate_py_error(py, e, &context))?;
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
        })
    }
}

impl ModuleLoader for PythonModuleLoader {
    fn loader_name(&self) -> &str {
        "python"
    }

    fn check_file_extension(&self, path: &Path) -> bool {
        path.extension().map(|e| e == "py").unwrap_or(false)
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
        Python::with_gil(|py| -> GrtResult<()> {
            let code = CString::new(script)
                .map_err(|_| GrtError::module("script contains NUL bytes"))?;
            py.run(&code, None, None)
                .map_err(|e| translate_py_error(py, e, "running Python script"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Member, MetaClassBuilder};
    use crate::runtime::RuntimeOptions;
    use std::io::Write;

    fn write_module(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(rt: &Runtime, values: Vec<Value>) -> ListRef {
        let list = ListRef::new();
        for v in values {
            list.insert(rt, v).unwrap();
        }
        list
    }

    const DEMO_MODULE: &str = r#"
import grt

def add(a, b):
    "add two numbers"
    return a + b

def total(values):
    return sum(values[i] for i in range(len(values)))

def rename_object(obj, name):
    old = obj.get_member("name")
    obj.set_member("name", name)
    return old

def cancel():
    raise grt.UserCancelled("stopped")

def boom():
    raise ValueError("kaput")

ModuleInfo = {
    "name": "PyDemo",
    "version": "1.0",
    "author": "tests",
    "description": "demo module",
    "implements": ["DemoInterface"],
    "functions": [
        ("add", ("int", [("a", "int"), ("b", "int")]), add),
        ("total", ("int", [("values", ("list", "int"))]), total),
        ("renameObject",
         ("string", [("obj", ("object", "demo.Item")), ("name", "string")]),
         rename_object),
        ("cancel", ("int", []), cancel),
        ("boom", ("int", []), boom),
    ],
}
"#;

    fn runtime_with_loader() -> (Arc<Runtime>, PythonModuleLoader) {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.add_metaclass(
            MetaClassBuilder::new("demo.Item")
                .member(Member::string("name"))
                .build(),
        )
        .unwrap();
        rt.end_loading_metaclasses().unwrap();
        let loader = PythonModuleLoader::new(&rt).unwrap();
        (rt, loader)
    }

    #[test]
    fn test_load_and_call_python_module() {
        let (rt, loader) = runtime_with_loader();
        let file = write_module(DEMO_MODULE);
        let module = loader.init_module(file.path()).unwrap();
        assert_eq!(module.name(), "PyDemo");
        assert_eq!(module.info().implements, vec!["DemoInterface"]);
        assert_eq!(
            module.get_function("add").unwrap().signature.description,
            "add two numbers"
        );
        rt.register_module(module).unwrap();

        let result = rt
            .call_module_function(
                "PyDemo",
                "add",
                &args(&rt, vec![Value::from(2), Value::from(3)]),
            )
            .unwrap();
        assert_eq!(result, Value::from(5));
    }

    #[test]
    fn test_list_wrapper_reference_semantics() {
        let (rt, loader) = runtime_with_loader();
        let file = write_module(DEMO_MODULE);
        rt.register_module(loader.init_module(file.path()).unwrap()).unwrap();

        let list = ListRef::typed(SimpleTypeSpec::of(Type::Integer), false);
        for i in [1i64, 2, 3] {
            list.insert(&rt, Value::from(i)).unwrap();
        }
        let result = rt
            .call_module_function("PyDemo", "total", &args(&rt, vec![Value::List(list)]))
            .unwrap();
        assert_eq!(result, Value::from(6));
    }

    #[test]
    fn test_object_proxy_mutates_underlying_object() {
        let (rt, loader) = runtime_with_loader();
        let file = write_module(DEMO_MODULE);
        rt.register_module(loader.init_module(file.path()).unwrap()).unwrap();

        let item = rt.allocate("demo.Item").unwrap();
        rt.set_member(item, "name", Value::from("old")).unwrap();

        let result = rt
            .call_module_function(
                "PyDemo",
                "renameObject",
                &args(&rt, vec![Value::Object(item), Value::from("new")]),
            )
            .unwrap();
        assert_eq!(result, Value::from("old"));
        assert_eq!(rt.get_string_member(item, "name").unwrap(), "new");
    }

    #[test]
    fn test_argument_validation_before_entering_python() {
        let (rt, loader) = runtime_with_loader();
        let file = write_module(DEMO_MODULE);
        rt.register_module(loader.init_module(file.path()).unwrap()).unwrap();

        let err = rt
            .call_module_function("PyDemo", "add", &args(&rt, vec![Value::from(1)]))
            .unwrap_err();
        assert!(err.to_string().contains("takes 2 arguments"));

        let err = rt
            .call_module_function(
                "PyDemo",
                "add",
                &args(&rt, vec![Value::from("x"), Value::from(1)]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("argument 1"));
    }

    #[test]
    fn test_exception_translation_by_class_identity() {
        let (rt, loader) = runtime_with_loader();
        let file = write_module(DEMO_MODULE);
        rt.register_module(loader.init_module(file.path()).unwrap()).unwrap();

        let err = rt
            .call_module_function("PyDemo", "cancel", &args(&rt, vec![]))
            .unwrap_err();
        assert!(matches!(err, GrtError::UserCancelled(msg) if msg == "stopped"));

        let err = rt
            .call_module_function("PyDemo", "boom", &args(&rt, vec![]))
            .unwrap_err();
        match err {
            GrtError::Module { inner, .. } => {
                let inner = inner.unwrap_or_default();
                assert!(inner.contains("ValueError"));
                assert!(inner.contains("kaput"));
            }
            other => panic!("expected module error, got {other:?}"),
        }
    }

    #[test]
    fn test_module_without_moduleinfo_is_error() {
        let (_rt, loader) = runtime_with_loader();
        let file = write_module("x = 1");
        let err = loader.init_module(file.path()).unwrap_err();
        assert!(err.to_string().contains("ModuleInfo"));
    }

    #[test]
    fn test_run_script() {
        let (_rt, loader) = runtime_with_loader();
        loader.run_script("x = 40 + 2").unwrap();
        assert!(loader.run_script("nonsense(").is_err());
    }
}
