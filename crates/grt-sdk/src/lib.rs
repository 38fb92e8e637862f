//! GRT SDK - Lightweight SDK for declaring GRT modules
//!
//! This crate provides the minimal types needed to describe a GRT module -
//! its metadata, its function signatures, and the type specifications those
//! signatures are built from - without depending on the full grt-engine.
//!
//! # Example
//!
//! ```ignore
//! use grt_sdk::{FunctionSignature, ModuleInfo};
//!
//! let info = ModuleInfo::new("MyModule", "1.0.0")
//!     .implements("PluginInterface");
//! let sig = FunctionSignature::parse("formatName:s:s name,i flags")?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod module_info;
mod types;

pub use error::{GrtError, GrtResult};
pub use module_info::ModuleInfo;
pub use types::{ArgSpec, FunctionSignature, SimpleTypeSpec, Type, TypeSpec};
