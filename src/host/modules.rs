//! UI module registrations created by scripts for the host's menu system.

use std::sync::Mutex;

/// A menu module declared by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Name of the script that registered the module.
    pub script: String,
    /// Module identifier, unique per script.
    pub name: String,
    /// Title shown in the menu.
    pub title: String,
    /// Menu category.
    pub category: String,
}

/// Registry of script-declared menu modules.
#[derive(Debug, Default)]
pub struct ModuleSink {
    modules: Mutex<Vec<ModuleSpec>>,
}

impl ModuleSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Returns false if the script already registered a
    /// module with the same name.
    pub fn register(&self, spec: ModuleSpec) -> bool {
        let mut modules = self.modules.lock().expect("module sink poisoned");
        if modules
            .iter()
            .any(|m| m.script == spec.script && m.name == spec.name)
        {
            return false;
        }
        modules.push(spec);
        true
    }

    /// All registered modules, in registration order.
    pub fn list(&self) -> Vec<ModuleSpec> {
        self.modules.lock().expect("module sink poisoned").clone()
    }

    /// Remove every module a script registered. Returns the number removed.
    pub fn remove_for_script(&self, script: &str) -> usize {
        let mut modules = self.modules.lock().expect("module sink poisoned");
        let before = modules.len();
        modules.retain(|m| m.script != script);
        before - modules.len()
    }
}
