//! Adapter type to command mapping.

use std::collections::HashMap;

use dap_relay_process::AdapterCommand;

/// Known adapter types and how to launch them.
#[derive(Debug, Clone)]
pub struct AdapterCatalog {
    entries: HashMap<String, AdapterCommand>,
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AdapterCatalog {
    /// Catalog with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Stock stdio adapters.
    #[must_use]
    pub fn builtin() -> Self {
        let debugpy = AdapterCommand::new("python3", ["-m", "debugpy.adapter"]);
        let delve = AdapterCommand::new("dlv", ["dap"]);

        let mut catalog = Self::empty();
        catalog.register("node", AdapterCommand::new("node", Vec::<String>::new()));
        catalog.register("python", debugpy.clone());
        catalog.register("debugpy", debugpy);
        catalog.register("go", delve.clone());
        catalog.register("delve", delve);
        catalog.register("lldb", AdapterCommand::new("lldb-dap", Vec::<String>::new()));
        catalog.register("gdb", AdapterCommand::new("gdb", ["-i", "dap"]));
        catalog
    }

    /// Add or replace an adapter type. Type names are case-insensitive.
    pub fn register(&mut self, adapter_type: &str, command: AdapterCommand) {
        self.entries.insert(adapter_type.to_ascii_lowercase(), command);
    }

    /// Merge `overrides` over the current entries.
    #[must_use]
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a AdapterCommand)>,
    {
        for (adapter_type, command) in overrides {
            self.register(adapter_type, command.clone());
        }
        self
    }

    /// Command for `adapter_type`, if known.
    #[must_use]
    pub fn lookup(&self, adapter_type: &str) -> Option<&AdapterCommand> {
        self.entries.get(&adapter_type.to_ascii_lowercase())
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn adapter_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let catalog = AdapterCatalog::builtin();
        let python = catalog.lookup("Python").unwrap();
        assert_eq!(python.command, "python3");
        assert_eq!(python.args, vec!["-m", "debugpy.adapter"]);
        assert!(catalog.lookup("cobol").is_none());
    }

    #[test]
    fn test_overrides_replace_builtin() {
        let mut overrides = HashMap::new();
        overrides.insert("go".to_string(), AdapterCommand::new("/opt/dlv", ["dap", "--log"]));
        overrides.insert("mock".to_string(), AdapterCommand::new("./mock", Vec::<String>::new()));

        let catalog = AdapterCatalog::builtin().with_overrides(&overrides);
        assert_eq!(catalog.lookup("go").unwrap().command, "/opt/dlv");
        assert!(catalog.lookup("mock").is_some());
        assert!(catalog.adapter_types().contains(&"gdb"));
    }
}
