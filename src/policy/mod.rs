//! Policy module representation.
//!
//! A [`PolicyModule`] is Rego source text paired with the name the engine
//! registers it under. Modules are immutable once created.

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rego source text and the name it is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyModule {
    name: String,
    content: String,
}

impl PolicyModule {
    /// Create a module from its name and source text.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Load a module from a `.rego` file. The file path becomes the module name.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(path.to_string_lossy(), content))
    }

    /// Module name used for diagnostics and engine registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rego source text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Check that the module can be handed to the engine.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::compilation("Module name cannot be empty"));
        }

        if self.content.trim().is_empty() {
            return Err(Error::compilation_in(
                "Policy content cannot be empty",
                self.name.clone(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_module_validate() {
        let module = PolicyModule::new("authz.rego", "package p\nallow { true }");
        assert!(module.validate().is_ok());
        assert_eq!(module.name(), "authz.rego");
    }

    #[test]
    fn test_module_rejects_empty_content() {
        let module = PolicyModule::new("authz.rego", "  \n");
        match module.validate() {
            Err(Error::PolicyCompilation { module, .. }) => {
                assert_eq!(module.as_deref(), Some("authz.rego"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_module_rejects_empty_name() {
        let module = PolicyModule::new("", "package p");
        assert!(matches!(module.validate(), Err(Error::PolicyCompilation { .. })));
    }

    #[test]
    fn test_module_from_file() {
        let path = std::env::temp_dir().join(format!("rego-enforcer-{}.rego", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "package files\nallow {{ true }}").unwrap();

        let module = PolicyModule::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(module.name(), path.to_string_lossy());
        assert!(module.content().starts_with("package files"));
    }

    #[test]
    fn test_module_from_missing_file() {
        let err = PolicyModule::from_file("/nonexistent/policy.rego").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
