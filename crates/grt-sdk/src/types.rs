//! Type specifications for GRT values and module function signatures
//!
//! A `TypeSpec` describes the expected shape of a value: its base type and,
//! for containers, the content type (possibly an object class name). Type
//! specs are exchanged with embedded-language loaders as string tags
//! (`"int"`, `"double"`, `"string"`, `"list"`, `"dict"`, `"object"`) and
//! with native modules through the compact function-spec syntax parsed by
//! [`FunctionSignature::parse`].

use std::fmt;

use crate::error::{GrtError, GrtResult};

/// Base type tag of a GRT value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Type {
    /// Unknown/unconstrained type (also used for void returns)
    #[default]
    Any,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Double,
    /// UTF-8 string
    String,
    /// Ordered sequence of values
    List,
    /// Name → value mapping
    Dict,
    /// Reference to an object instance
    Object,
}

impl Type {
    /// Parse a string tag as used by embedded-language loaders.
    ///
    /// `"real"` is accepted as an alias for `"double"`; anything else
    /// unknown maps to `Any`.
    pub fn from_tag(tag: &str) -> Type {
        match tag {
            "int" => Type::Integer,
            "double" | "real" => Type::Double,
            "string" => Type::String,
            "list" => Type::List,
            "dict" => Type::Dict,
            "object" => Type::Object,
            _ => Type::Any,
        }
    }

    /// The canonical string tag for this type
    pub fn tag(&self) -> &'static str {
        match self {
            Type::Any => "any",
            Type::Integer => "int",
            Type::Double => "double",
            Type::String => "string",
            Type::List => "list",
            Type::Dict => "dict",
            Type::Object => "object",
        }
    }

    /// Whether values of this type are immutable and freely shared
    pub fn is_simple(&self) -> bool {
        matches!(self, Type::Integer | Type::Double | Type::String)
    }

    /// Whether this is a container type (list or dict)
    pub fn is_container(&self) -> bool {
        matches!(self, Type::List | Type::Dict)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A base type plus, for objects, the class name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleTypeSpec {
    /// The base type
    pub type_: Type,
    /// Class name when `type_` is `Object` (empty means any object)
    pub object_class: String,
}

impl SimpleTypeSpec {
    /// A spec for a plain (non-object) type
    pub fn of(type_: Type) -> Self {
        SimpleTypeSpec {
            type_,
            object_class: String::new(),
        }
    }

    /// A spec for an object of a given class
    pub fn object(class: impl Into<String>) -> Self {
        SimpleTypeSpec {
            type_: Type::Object,
            object_class: class.into(),
        }
    }
}

impl fmt::Display for SimpleTypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_ == Type::Object && !self.object_class.is_empty() {
            f.write_str(&self.object_class)
        } else {
            f.write_str(self.type_.tag())
        }
    }
}

/// Full type specification: base type and, for containers, content type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeSpec {
    /// Type of the value itself
    pub base: SimpleTypeSpec,
    /// Type of stored items when `base` is a list or dict
    pub content: SimpleTypeSpec,
}

impl TypeSpec {
    /// A spec for a plain type with unconstrained content
    pub fn of(type_: Type) -> Self {
        TypeSpec {
            base: SimpleTypeSpec::of(type_),
            content: SimpleTypeSpec::default(),
        }
    }

    /// A spec for an object of a given class
    pub fn object(class: impl Into<String>) -> Self {
        TypeSpec {
            base: SimpleTypeSpec::object(class),
            content: SimpleTypeSpec::default(),
        }
    }

    /// A spec for a list with the given content type
    pub fn list_of(content: SimpleTypeSpec) -> Self {
        TypeSpec {
            base: SimpleTypeSpec::of(Type::List),
            content,
        }
    }

    /// A spec for a dict with the given content type
    pub fn dict_of(content: SimpleTypeSpec) -> Self {
        TypeSpec {
            base: SimpleTypeSpec::of(Type::Dict),
            content,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base.type_ {
            Type::List | Type::Dict => {
                if self.content.type_ == Type::Any {
                    f.write_str(self.base.type_.tag())
                } else {
                    write!(f, "{}<{}>", self.base.type_.tag(), self.content)
                }
            }
            _ => self.base.fmt(f),
        }
    }
}

/// A named, typed function argument
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgSpec {
    /// Argument label (may be empty)
    pub name: String,
    /// Argument type
    pub type_: TypeSpec,
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            self.type_.fmt(f)
        } else {
            write!(f, "{} {}", self.type_, self.name)
        }
    }
}

/// Declared shape of a module function: name, return type, argument types
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionSignature {
    /// Function name as exposed to callers
    pub name: String,
    /// Human-readable description (doc string)
    pub description: String,
    /// Return type (`Type::Any` base for void)
    pub ret_type: TypeSpec,
    /// Ordered argument specifications
    pub arg_types: Vec<ArgSpec>,
}

impl FunctionSignature {
    /// Parse a compact function specification.
    ///
    /// Syntax: `name:ret:param_list` where
    ///
    /// ```text
    /// param_list ::= param[,param_list]
    /// param      ::= type [label]
    /// type       ::= i | r | s | l[<content>] | d[<content>] | o[@struct]
    /// content    ::= i | r | s | o@struct
    /// ```
    ///
    /// Example: `doSomething:s:i count,l<i> poslist,o@db.Table table,d args`
    pub fn parse(spec: &str) -> GrtResult<FunctionSignature> {
        let mut parts = spec.splitn(3, ':');
        let name = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GrtError::module(format!("missing function name in spec '{spec}'")))?;
        let ret = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("");

        let ret_type = if ret.is_empty() || ret == "v" {
            TypeSpec::default()
        } else {
            parse_type_code(ret)
                .map_err(|e| GrtError::module(format!("bad return type in spec '{spec}': {e}")))?
        };

        let mut arg_types = Vec::new();
        for param in args.split(',').filter(|p| !p.trim().is_empty()) {
            let param = param.trim();
            let (code, label) = match param.find(' ') {
                Some(pos) => (&param[..pos], param[pos + 1..].trim()),
                None => (param, ""),
            };
            let type_ = parse_type_code(code)
                .map_err(|e| GrtError::module(format!("bad argument '{param}' in spec '{spec}': {e}")))?;
            arg_types.push(ArgSpec {
                name: label.to_string(),
                type_,
            });
        }

        Ok(FunctionSignature {
            name: name.to_string(),
            description: String::new(),
            ret_type,
            arg_types,
        })
    }

    /// Format the argument list the way diagnostics print it
    pub fn format_args(&self) -> String {
        let mut out = String::new();
        for arg in &self.arg_types {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&arg.to_string());
        }
        out
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}({})", self.ret_type, self.name, self.format_args())
    }
}

/// Parse one type code: `i`, `r`, `s`, `l<...>`, `d<...>`, `o@Class`
fn parse_type_code(code: &str) -> Result<TypeSpec, String> {
    let mut chars = code.chars();
    let head = chars.next().ok_or("empty type code")?;
    let rest = chars.as_str();

    match head {
        'i' if rest.is_empty() => Ok(TypeSpec::of(Type::Integer)),
        'r' if rest.is_empty() => Ok(TypeSpec::of(Type::Double)),
        's' if rest.is_empty() => Ok(TypeSpec::of(Type::String)),
        'o' => {
            if rest.is_empty() {
                Ok(TypeSpec::of(Type::Object))
            } else if let Some(class) = rest.strip_prefix('@') {
                if class.is_empty() {
                    Err("missing class name after 'o@'".to_string())
                } else {
                    Ok(TypeSpec::object(class))
                }
            } else {
                Err(format!("unexpected trailing '{rest}' after 'o'"))
            }
        }
        'l' | 'd' => {
            let content = if rest.is_empty() {
                SimpleTypeSpec::default()
            } else {
                let inner = rest
                    .strip_prefix('<')
                    .and_then(|r| r.strip_suffix('>'))
                    .ok_or_else(|| format!("malformed content spec '{rest}'"))?;
                parse_content_code(inner)?
            };
            if head == 'l' {
                Ok(TypeSpec::list_of(content))
            } else {
                Ok(TypeSpec::dict_of(content))
            }
        }
        _ => Err(format!("unknown type code '{code}'")),
    }
}

fn parse_content_code(code: &str) -> Result<SimpleTypeSpec, String> {
    match code {
        "i" => Ok(SimpleTypeSpec::of(Type::Integer)),
        "r" => Ok(SimpleTypeSpec::of(Type::Double)),
        "s" => Ok(SimpleTypeSpec::of(Type::String)),
        "o" => Ok(SimpleTypeSpec::of(Type::Object)),
        _ => {
            if let Some(class) = code.strip_prefix("o@") {
                if class.is_empty() {
                    Err("missing class name after 'o@'".to_string())
                } else {
                    Ok(SimpleTypeSpec::object(class))
                }
            } else {
                Err(format!("unknown content code '{code}'"))
            }
        }
    }
}
