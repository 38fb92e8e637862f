//! Error types shared by the GRT engine and module implementations

/// Result type for GRT operations
pub type GrtResult<T> = Result<T, GrtError>;

/// GRT error taxonomy.
///
/// Low-level marshaling failures are caught at language-boundary call sites
/// and re-signaled as the matching variant in the caller's native error
/// convention; errors never cross a language boundary in their
/// origin-language representation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GrtError {
    /// Value does not match the expected type specification
    #[error("Type mismatch: expected {expected}, but got {actual}")]
    Type {
        /// Expected type description
        expected: String,
        /// Actual type description
        actual: String,
    },

    /// Missing dict key or object member
    #[error("Invalid item name '{0}'")]
    BadItem(String),

    /// List index out of range
    #[error("Index {index} out of range (count is {count})")]
    BadIndex {
        /// Requested index
        index: usize,
        /// Number of items in the container
        count: usize,
    },

    /// Attempt to operate on a null value where one is not allowed
    #[error("Attempt to operate on a null value: {0}")]
    NullValue(String),

    /// Attempt to assign a read-only member
    #[error("{0} is read-only")]
    ReadOnly(String),

    /// Unknown or unregistered class name
    #[error("Invalid class {0}")]
    BadClass(String),

    /// Module dispatch or marshaling failure; `inner` carries the foreign
    /// detail (e.g. the formatted interpreter exception) when there is one.
    #[error("Module error: {message}")]
    Module {
        /// Error description
        message: String,
        /// Optional foreign-side detail
        inner: Option<String>,
    },

    /// The user cancelled a long-running operation
    #[error("Operation cancelled: {0}")]
    UserCancelled(String),

    /// Database server denied access
    #[error("Access denied: {0}")]
    DbAccessDenied(String),

    /// Database login failed
    #[error("Login error: {0}")]
    DbLoginError(String),

    /// Module file I/O failure
    #[error("{context}: {message}")]
    Os {
        /// What was being attempted
        context: String,
        /// Underlying OS error text
        message: String,
    },

    /// Generic runtime failure with optional detail
    #[error("{message}")]
    Runtime {
        /// Error description
        message: String,
        /// Additional detail for diagnostics
        detail: String,
    },
}

impl GrtError {
    /// Build a `Type` error from two type descriptions
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        GrtError::Type {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build a `Module` error with no inner detail
    pub fn module(message: impl Into<String>) -> Self {
        GrtError::Module {
            message: message.into(),
            inner: None,
        }
    }

    /// Build a `Module` error with foreign-side detail
    pub fn module_with_inner(message: impl Into<String>, inner: impl Into<String>) -> Self {
        GrtError::Module {
            message: message.into(),
            inner: Some(inner.into()),
        }
    }

    /// Build a `Runtime` error with empty detail
    pub fn runtime(message: impl Into<String>) -> Self {
        GrtError::Runtime {
            message: message.into(),
            detail: String::new(),
        }
    }

    /// Build an `Os` error from an `std::io::Error`
    pub fn os(context: impl Into<String>, err: &std::io::Error) -> Self {
        GrtError::Os {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = GrtError::type_mismatch("list<db.Column>", "string");
        assert_eq!(
            err.to_string(),
            "Type mismatch: expected list<db.Column>, but got string"
        );
    }

    #[test]
    fn test_module_error_display() {
        let err = GrtError::module_with_inner("error calling Foo.bar", "ValueError(\"x\")");
        assert_eq!(err.to_string(), "Module error: error calling Foo.bar");
        match err {
            GrtError::Module { inner, .. } => assert_eq!(inner.as_deref(), Some("ValueError(\"x\")")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_bad_index_display() {
        let err = GrtError::BadIndex { index: 5, count: 2 };
        assert_eq!(err.to_string(), "Index 5 out of range (count is 2)");
    }
}
