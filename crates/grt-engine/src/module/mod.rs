//! Module system
//!
//! A [`Module`] is a named collection of uniformly callable, type-checked
//! functions. Modules are produced by a [`ModuleLoader`] - one per
//! implementation language - and registered once on the runtime, where they
//! persist for its lifetime (modules are never unloaded; dropping live
//! foreign code out from under callers is the failure mode that rule
//! avoids). An [`Interface`] names a set of required function signatures a
//! module can claim to implement; the claim is checked structurally, not
//! nominally.

pub mod native;

#[cfg(feature = "lua")]
pub mod lua;
#[cfg(feature = "python")]
pub mod python;

use std::path::{Path, PathBuf};

use grt_sdk::{FunctionSignature, GrtError, GrtResult, ModuleInfo};

use crate::runtime::Runtime;
use crate::value::{ListRef, Value};

/// Implementation of one module function.
///
/// Receives the runtime and the argument list; returns a GRT value or a
/// typed GRT error. Loader-produced implementations do their own
/// marshaling into and out of the foreign language.
pub type FunctionImpl = Box<dyn Fn(&Runtime, &ListRef) -> GrtResult<Value> + Send + Sync>;

/// One callable module function: declared signature plus implementation
pub struct Function {
    /// Declared signature
    pub signature: FunctionSignature,
    call: FunctionImpl,
}

impl Function {
    /// Create a function from a signature and an implementation
    pub fn new(signature: FunctionSignature, call: FunctionImpl) -> Self {
        Function { signature, call }
    }

    /// Invoke the implementation (argument validation is the caller's or
    /// the loader wrapper's concern)
    pub fn call(&self, rt: &Runtime, args: &ListRef) -> GrtResult<Value> {
        (self.call)(rt, args)
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

/// Validate a call's arguments against a declared signature.
///
/// Checks the argument count and each argument against its declared type
/// spec (object classes included). Used by loaders before crossing into
/// the foreign implementation.
pub fn validate_args(rt: &Runtime, signature: &FunctionSignature, args: &ListRef) -> GrtResult<()> {
    if args.count() != signature.arg_types.len() {
        return Err(GrtError::module(format!(
            "{}() takes {} arguments ({} given)",
            signature.name,
            signature.arg_types.len(),
            args.count()
        )));
    }
    for (i, spec) in signature.arg_types.iter().enumerate() {
        let value = args.get(i)?;
        if value.is_null() {
            if spec.type_.base.type_.is_simple() {
                return Err(GrtError::module(format!(
                    "{}(): argument {} must be a {} but is null",
                    signature.name,
                    i + 1,
                    spec.type_
                )));
            }
            continue;
        }
        rt.check_type(&spec.type_, &value).map_err(|_| {
            GrtError::module(format!(
                "{}(): argument {} must be a {}",
                signature.name,
                i + 1,
                spec.type_
            ))
        })?;
    }
    Ok(())
}

/// A named unit of callable functions, loaded once and never unloaded
pub struct Module {
    info: ModuleInfo,
    path: PathBuf,
    loader_name: String,
    functions: Vec<Function>,
}

impl Module {
    /// Create an empty module
    pub fn new(info: ModuleInfo, loader_name: impl Into<String>) -> Self {
        Module {
            info,
            path: PathBuf::new(),
            loader_name: loader_name.into(),
            functions: Vec::new(),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Module metadata
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// File the module was loaded from (empty for in-process modules)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the file the module was loaded from
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Name of the loader that produced this module
    pub fn loader_name(&self) -> &str {
        &self.loader_name
    }

    /// Add a function
    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    /// Add a function declared by a compact spec string
    /// (see [`FunctionSignature::parse`])
    pub fn add_parse_function_spec(&mut self, spec: &str, call: FunctionImpl) -> GrtResult<()> {
        let signature = FunctionSignature::parse(spec)?;
        self.functions.push(Function::new(signature, call));
        Ok(())
    }

    /// All function declarations
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    /// Whether the module exposes `name`
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.signature.name == name)
    }

    /// Find a function by name
    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.signature.name == name)
    }

    /// Dispatch a function call by name.
    ///
    /// Unknown names produce a module error; implementation failures
    /// propagate as the implementation's typed GRT error.
    pub fn call_function(&self, rt: &Runtime, name: &str, args: &ListRef) -> GrtResult<Value> {
        let function = self.get_function(name).ok_or_else(|| {
            GrtError::module(format!(
                "Module {} has no function {name}",
                self.info.name
            ))
        })?;
        function.call(rt, args)
    }

    /// Check basic consistency: non-empty name, unique function names
    pub fn validate(&self) -> GrtResult<()> {
        if self.info.name.is_empty() {
            return Err(GrtError::module("module has no name"));
        }
        for (i, f) in self.functions.iter().enumerate() {
            if self.functions[..i]
                .iter()
                .any(|g| g.signature.name == f.signature.name)
            {
                return Err(GrtError::module(format!(
                    "module {} declares function {} twice",
                    self.info.name, f.signature.name
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.info.name)
            .field("loader", &self.loader_name)
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// Loader for modules implemented in one language.
///
/// Loaders are installed on the runtime at startup and asked, in order,
/// whether they recognize a module file.
pub trait ModuleLoader: Send + Sync {
    /// Loader name (`"native"`, `"python"`, `"lua"`)
    fn loader_name(&self) -> &str;

    /// Whether this loader handles the given module file
    fn check_file_extension(&self, path: &Path) -> bool;

    /// Build a module from a file; problems are reported as errors and the
    /// file is skipped by directory scans.
    fn init_module(&self, path: &Path) -> GrtResult<Module>;

    /// Called when the loader is installed and after module scans
    fn refresh(&self) {}

    /// Run a script file, for script-capable loaders
    fn run_script_file(&self, _path: &Path) -> GrtResult<()> {
        Err(GrtError::module(format!(
            "loader {} cannot run scripts",
            self.loader_name()
        )))
    }

    /// Run a script snippet, for script-capable loaders
    fn run_script(&self, _script: &str) -> GrtResult<()> {
        Err(GrtError::module(format!(
            "loader {} cannot run scripts",
            self.loader_name()
        )))
    }
}

/// A set of required function signatures modules can claim to implement
#[derive(Debug, Clone, Default)]
pub struct Interface {
    /// Interface name
    pub name: String,
    /// Required function signatures
    pub functions: Vec<FunctionSignature>,
}

impl Interface {
    /// Create an interface from its required signatures
    pub fn new(name: impl Into<String>, functions: Vec<FunctionSignature>) -> Self {
        Interface {
            name: name.into(),
            functions,
        }
    }

    /// Create an interface from compact spec strings
    pub fn parse(name: impl Into<String>, specs: &[&str]) -> GrtResult<Self> {
        let mut functions = Vec::new();
        for spec in specs {
            functions.push(FunctionSignature::parse(spec)?);
        }
        Ok(Interface {
            name: name.into(),
            functions,
        })
    }

    /// Structural conformance check.
    ///
    /// For every required function, a same-named function must exist on the
    /// module with an identical return type and an identical, same-length
    /// ordered argument-type list. Each mismatch produces a warning
    /// diagnostic; the result is a boolean, never an error.
    pub fn check_conformance(&self, module: &Module) -> bool {
        let mut ok = true;
        for required in &self.functions {
            let found = match module.get_function(&required.name) {
                Some(found) => found,
                None => {
                    tracing::warn!(
                        module = module.name(),
                        interface = %self.name,
                        function = %required.name,
                        "module is missing a function required by the interface"
                    );
                    ok = false;
                    continue;
                }
            };
            let signature = &found.signature;
            if signature.ret_type != required.ret_type {
                tracing::warn!(
                    module = module.name(),
                    interface = %self.name,
                    function = %required.name,
                    expected = %required.ret_type,
                    found = %signature.ret_type,
                    "function return type does not match the interface"
                );
                ok = false;
            }
            if signature.arg_types.len() != required.arg_types.len() {
                tracing::warn!(
                    module = module.name(),
                    interface = %self.name,
                    function = %required.name,
                    expected = required.arg_types.len(),
                    found = signature.arg_types.len(),
                    "function argument count does not match the interface"
                );
                ok = false;
                continue;
            }
            for (i, (have, want)) in signature
                .arg_types
                .iter()
                .zip(required.arg_types.iter())
                .enumerate()
            {
                if have.type_ != want.type_ {
                    tracing::warn!(
                        module = module.name(),
                        interface = %self.name,
                        function = %required.name,
                        argument = i + 1,
                        expected = %want.type_,
                        found = %have.type_,
                        "function argument type does not match the interface"
                    );
                    ok = false;
                }
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeOptions};
    use grt_sdk::{ModuleInfo, Type, TypeSpec};
    use std::sync::Arc;

    fn rt() -> Arc<Runtime> {
        Runtime::new(RuntimeOptions::default())
    }

    fn test_module() -> Module {
        let mut module = Module::new(ModuleInfo::new("TestModule", "1.0"), "native");
        module
            .add_parse_function_spec(
                "add:i:i a,i b",
                Box::new(|_rt, args| {
                    let a = args.get(0)?.as_int()?;
                    let b = args.get(1)?.as_int()?;
                    Ok(Value::Integer(a + b))
                }),
            )
            .unwrap();
        module
            .add_parse_function_spec(
                "greet:s:s name",
                Box::new(|_rt, args| {
                    Ok(Value::from(format!("hello {}", args.get(0)?.as_string()?)))
                }),
            )
            .unwrap();
        module
    }

    fn args(rt: &Runtime, values: Vec<Value>) -> ListRef {
        let list = ListRef::new();
        for v in values {
            list.insert(rt, v).unwrap();
        }
        list
    }

    #[test]
    fn test_call_function() {
        let rt = rt();
        let module = test_module();
        let result = module
            .call_function(&rt, "add", &args(&rt, vec![Value::from(2), Value::from(3)]))
            .unwrap();
        assert_eq!(result, Value::from(5));
    }

    #[test]
    fn test_unknown_function() {
        let rt = rt();
        let module = test_module();
        let err = module
            .call_function(&rt, "missing", &args(&rt, vec![]))
            .unwrap_err();
        assert!(matches!(err, GrtError::Module { .. }));
    }

    #[test]
    fn test_validate_duplicate_function() {
        let mut module = test_module();
        module
            .add_parse_function_spec("add:i:i a,i b", Box::new(|_rt, _args| Ok(Value::Null)))
            .unwrap();
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_args_count_and_types() {
        let rt = rt();
        let sig = FunctionSignature::parse("f:i:i a,s b").unwrap();

        assert!(validate_args(&rt, &sig, &args(&rt, vec![Value::from(1), Value::from("x")])).is_ok());

        let err =
            validate_args(&rt, &sig, &args(&rt, vec![Value::from(1)])).unwrap_err();
        assert!(err.to_string().contains("takes 2 arguments"));

        let err = validate_args(
            &rt,
            &sig,
            &args(&rt, vec![Value::from("wrong"), Value::from("x")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("argument 1"));

        // null is rejected for simple argument types
        let err = validate_args(&rt, &sig, &args(&rt, vec![Value::Null, Value::from("x")]))
            .unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_conformance_exact_match() {
        let module = test_module();
        let iface = Interface::parse("Adder", &["add:i:i a,i b"]).unwrap();
        assert!(iface.check_conformance(&module));
    }

    #[test]
    fn test_conformance_missing_function() {
        let module = test_module();
        let iface = Interface::parse("Subber", &["sub:i:i a,i b"]).unwrap();
        assert!(!iface.check_conformance(&module));
    }

    #[test]
    fn test_conformance_wrong_return_type() {
        let module = test_module();
        let iface = Interface::parse("Adder", &["add:s:i a,i b"]).unwrap();
        assert!(!iface.check_conformance(&module));
    }

    #[test]
    fn test_conformance_wrong_arg_count() {
        let module = test_module();
        let iface = Interface::parse("Adder", &["add:i:i a"]).unwrap();
        assert!(!iface.check_conformance(&module));
    }

    #[test]
    fn test_conformance_wrong_arg_type() {
        let module = test_module();
        let iface = Interface::parse("Adder", &["add:i:i a,s b"]).unwrap();
        assert!(!iface.check_conformance(&module));
    }

    #[test]
    fn test_conformance_argument_names_do_not_matter() {
        let module = test_module();
        let iface = Interface::parse("Adder", &["add:i:i x,i y"]).unwrap();
        assert!(iface.check_conformance(&module));
    }

    #[test]
    fn test_interface_signature_types() {
        let iface = Interface::parse("X", &["tables:l<o@db.Table>:s schema"]).unwrap();
        assert_eq!(iface.functions[0].ret_type.base.type_, Type::List);
        assert_eq!(
            iface.functions[0].arg_types[0].type_,
            TypeSpec::of(Type::String)
        );
    }
}
