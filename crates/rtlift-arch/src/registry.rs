//! Name-keyed registry of the available architectures.

use crate::x86::{ProcessorMode, X86Architecture};
use crate::{ArchError, ProcessorArchitecture};
use std::sync::OnceLock;

type Constructor = fn() -> Box<dyn ProcessorArchitecture>;

/// One registered architecture.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub description: &'static str,
    create: Constructor,
}

/// Immutable after construction; the built-in registry is shared process-wide.
#[derive(Debug, Default)]
pub struct ArchitectureRegistry {
    entries: Vec<RegistryEntry>,
}

impl ArchitectureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an architecture, replacing any entry of the same name.
    pub fn register(&mut self, name: &'static str, description: &'static str, create: Constructor) {
        self.entries.retain(|e| e.name != name);
        self.entries.push(RegistryEntry {
            name,
            description,
            create,
        });
    }

    /// Returns the registry of every architecture this crate implements.
    pub fn builtin() -> &'static ArchitectureRegistry {
        static BUILTIN: OnceLock<ArchitectureRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut registry = Self::new();
            registry.register(
                ProcessorMode::Real16.architecture_name(),
                "Intel x86 real mode, 16-bit segmented",
                || Box::new(X86Architecture::new(ProcessorMode::Real16)),
            );
            registry.register(
                ProcessorMode::Protected32.architecture_name(),
                "Intel x86 protected mode, 32-bit flat",
                || Box::new(X86Architecture::new(ProcessorMode::Protected32)),
            );
            registry
        })
    }

    /// Creates a fresh instance of the named architecture.
    pub fn create(&self, name: &str) -> Result<Box<dyn ProcessorArchitecture>, ArchError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.create)())
            .ok_or_else(|| ArchError::UnknownArchitecture(name.to_string()))
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let names: Vec<_> = ArchitectureRegistry::builtin().names().collect();
        assert_eq!(names, vec!["x86-real-16", "x86-protected-32"]);
    }

    #[test]
    fn test_create_by_name() {
        let registry = ArchitectureRegistry::builtin();
        let arch = registry.create("x86-real-16").unwrap();
        assert_eq!(arch.name(), "x86-real-16");
        assert_eq!(arch.stack_register().name, "sp");
        assert!(matches!(
            registry.create("z80"),
            Err(ArchError::UnknownArchitecture(name)) if name == "z80"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ArchitectureRegistry::new();
        registry.register("x", "first", || Box::new(X86Architecture::new(ProcessorMode::Real16)));
        registry.register("x", "second", || {
            Box::new(X86Architecture::new(ProcessorMode::Protected32))
        });
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].description, "second");
    }
}
