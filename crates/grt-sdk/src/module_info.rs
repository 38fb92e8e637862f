//! Module metadata
//!
//! Every GRT module carries the same metadata block regardless of which
//! language implements it: a name, a version, optional author/description,
//! and the list of interface names the module claims to implement (claims
//! are checked structurally by the engine, not taken on trust).

/// Metadata describing a GRT module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name, unique within a runtime
    pub name: String,
    /// Semantic version string
    pub version: String,
    /// Module author
    pub author: String,
    /// Human-readable description
    pub description: String,
    /// Names of interfaces this module claims to implement
    pub implements: Vec<String>,
}

impl ModuleInfo {
    /// Create metadata with a name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        ModuleInfo {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Set the author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an implemented interface name
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_info_builder() {
        let info = ModuleInfo::new("DbUtils", "1.2.0")
            .author("GRT Contributors")
            .description("Database helpers")
            .implements("PluginInterface")
            .implements("ExportInterface");

        assert_eq!(info.name, "DbUtils");
        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.implements, vec!["PluginInterface", "ExportInterface"]);
    }
}
