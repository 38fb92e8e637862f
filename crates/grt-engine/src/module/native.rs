//! Native (in-process Rust) module loader
//!
//! Native modules are registered as init functions rather than loaded from
//! shared libraries: an init function receives a [`NativeModuleBuilder`]
//! and attaches typed function implementations to it. The generated
//! dispatch wrapper validates argument count and types against the declared
//! signature before the implementation runs, so native functions get the
//! same call contract as embedded-language ones.

use std::path::Path;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use grt_sdk::{FunctionSignature, GrtError, GrtResult, ModuleInfo};

use super::{validate_args, Function, FunctionImpl, Module, ModuleLoader};
use crate::runtime::Runtime;
use crate::value::{ListRef, Value};

/// Entry point of a native module: build the module's functions
pub type GrtModuleInit = fn(&mut NativeModuleBuilder) -> GrtResult<()>;

/// Builder handed to a native module's init function
pub struct NativeModuleBuilder {
    module: Module,
}

impl NativeModuleBuilder {
    /// Start building a module with the given metadata
    pub fn new(info: ModuleInfo) -> Self {
        NativeModuleBuilder {
            module: Module::new(info, "native"),
        }
    }

    /// Replace the module metadata (init functions use this to declare
    /// name, version, and implemented interfaces)
    pub fn set_info(&mut self, info: ModuleInfo) {
        self.module.info = info;
    }

    /// Attach a function declared by a compact spec string
    /// (see [`FunctionSignature::parse`]).
    pub fn function(
        &mut self,
        spec: &str,
        implementation: impl Fn(&Runtime, &ListRef) -> GrtResult<Value> + Send + Sync + 'static,
    ) -> GrtResult<&mut Self> {
        let signature = FunctionSignature::parse(spec)?;
        self.function_with_signature(signature, implementation);
        Ok(self)
    }

    /// Attach a function with an explicit signature
    pub fn function_with_signature(
        &mut self,
        signature: FunctionSignature,
        implementation: impl Fn(&Runtime, &ListRef) -> GrtResult<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        let check_sig = signature.clone();
        let wrapped: FunctionImpl = Box::new(move |rt, args| {
            validate_args(rt, &check_sig, args)?;
            implementation(rt, args)
        });
        self.module.add_function(Function::new(signature, wrapped));
        self
    }

    /// Finish building
    pub fn build(self) -> Module {
        self.module
    }
}

/// Registry of native module init functions, keyed by module name
#[derive(Default)]
pub struct NativeModuleRegistry {
    inits: FxHashMap<String, GrtModuleInit>,
}

impl NativeModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        NativeModuleRegistry::default()
    }

    /// Register an init function under a module name
    pub fn register(&mut self, name: impl Into<String>, init: GrtModuleInit) {
        self.inits.insert(name.into(), init);
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.inits.contains_key(name)
    }

    /// Look up an init function
    pub fn get(&self, name: &str) -> Option<GrtModuleInit> {
        self.inits.get(name).copied()
    }

    /// Number of registered init functions
    pub fn len(&self) -> usize {
        self.inits.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inits.is_empty()
    }
}

/// Loader resolving `.grtmod` marker files against the init registry.
///
/// A marker file's stem names the registered module; in-process code can
/// also build modules directly through [`NativeModuleLoader::init_by_name`].
#[derive(Default)]
pub struct NativeModuleLoader {
    registry: RwLock<NativeModuleRegistry>,
}

impl NativeModuleLoader {
    /// Create a loader with an empty registry
    pub fn new() -> Self {
        NativeModuleLoader::default()
    }

    /// Register an init function under a module name
    pub fn register(&self, name: impl Into<String>, init: GrtModuleInit) {
        self.registry.write().register(name, init);
    }

    /// Build a registered module by name
    pub fn init_by_name(&self, name: &str) -> GrtResult<Module> {
        let init = self
            .registry
            .read()
            .get(name)
            .ok_or_else(|| GrtError::module(format!("Unknown native module: {name}")))?;
        build_module(init)
    }
}

fn build_module(init: GrtModuleInit) -> GrtResult<Module> {
    // the builder's metadata comes from the init function itself
    let mut builder = NativeModuleBuilder::new(ModuleInfo::default());
    init(&mut builder)?;
    Ok(builder.build())
}

impl ModuleLoader for NativeModuleLoader {
    fn loader_name(&self) -> &str {
        "native"
    }

    fn check_file_extension(&self, path: &Path) -> bool {
        path.extension().map(|e| e == "grtmod").unwrap_or(false)
    }

    fn init_module(&self, path: &Path) -> GrtResult<Module> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut module = self.init_by_name(&name)?;
        module.set_path(path);
        Ok(module)
    }
}

impl Runtime {
    /// Build and register a native module in one step.
    ///
    /// This is the in-process equivalent of loading a module file: the init
    /// function attaches functions (and the module metadata) to a builder,
    /// and the result is validated and registered.
    pub fn register_native_module(&self, init: GrtModuleInit) -> GrtResult<()> {
        self.register_module(build_module(init)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeOptions;
    use std::sync::Arc;

    fn math_module(builder: &mut NativeModuleBuilder) -> GrtResult<()> {
        builder.set_info(ModuleInfo::new("Math", "1.0").description("arithmetic helpers"));
        builder.function("add:i:i a,i b", |_rt, args| {
            Ok(Value::Integer(args.get(0)?.as_int()? + args.get(1)?.as_int()?))
        })?;
        builder.function("scale:r:r value,r factor", |_rt, args| {
            Ok(Value::Double(
                args.get(0)?.as_double()? * args.get(1)?.as_double()?,
            ))
        })?;
        Ok(())
    }

    fn args(rt: &Runtime, values: Vec<Value>) -> ListRef {
        let list = ListRef::new();
        for v in values {
            list.insert(rt, v).unwrap();
        }
        list
    }

    #[test]
    fn test_register_and_call_native_module() {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.register_native_module(math_module).unwrap();

        let result = rt
            .call_module_function("Math", "add", &args(&rt, vec![Value::from(4), Value::from(5)]))
            .unwrap();
        assert_eq!(result, Value::from(9));
    }

    #[test]
    fn test_dispatch_validates_arguments() {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.register_native_module(math_module).unwrap();

        // wrong count
        let err = rt
            .call_module_function("Math", "add", &args(&rt, vec![Value::from(4)]))
            .unwrap_err();
        assert!(err.to_string().contains("takes 2 arguments"));

        // wrong type
        let err = rt
            .call_module_function(
                "Math",
                "add",
                &args(&rt, vec![Value::from("x"), Value::from(5)]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("argument 1"));
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let rt = Runtime::new(RuntimeOptions::default());
        rt.register_native_module(math_module).unwrap();
        assert!(rt.register_native_module(math_module).is_err());
    }

    #[test]
    fn test_loader_resolves_marker_files() {
        let rt = Runtime::new(RuntimeOptions::default());
        let loader = NativeModuleLoader::new();
        loader.register("Math", math_module);

        assert!(loader.check_file_extension(Path::new("Math.grtmod")));
        assert!(!loader.check_file_extension(Path::new("Math.py")));

        let module = loader.init_module(Path::new("/modules/Math.grtmod")).unwrap();
        assert_eq!(module.name(), "Math");
        rt.register_module(module).unwrap();
        assert!(rt.get_module("Math").is_some());
    }

    #[test]
    fn test_unknown_native_module() {
        let loader = NativeModuleLoader::new();
        let err = loader.init_by_name("Nope").unwrap_err();
        assert!(err.to_string().contains("Unknown native module"));
    }

    #[test]
    fn test_find_modules_matching() {
        let rt = Runtime::new(RuntimeOptions::default());

        fn plugin_module(builder: &mut NativeModuleBuilder) -> GrtResult<()> {
            builder.set_info(ModuleInfo::new("DbPlugin", "1.0").implements("PluginInterface"));
            builder.function("ping:i:", |_rt, _args| Ok(Value::from(1)))?;
            Ok(())
        }

        rt.register_native_module(math_module).unwrap();
        rt.register_native_module(plugin_module).unwrap();

        let matches = rt.find_modules_matching("PluginInterface", "");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name(), "DbPlugin");

        let matches = rt.find_modules_matching("", "Db*");
        assert_eq!(matches.len(), 1);

        let matches = rt.find_modules_matching("", "*");
        assert_eq!(matches.len(), 2);
    }
}
