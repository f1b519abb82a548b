//! Persona specialization.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::DdxError;
use crate::library::Library;

use super::section::{Source, SectionInjector};

pub const MARKER: &str = "DDX-PERSONAS";

pub struct PersonaInjector {
    inner: SectionInjector,
}

impl Default for PersonaInjector {
    fn default() -> Self {
        Self {
            inner: SectionInjector::new(MARKER),
        }
    }
}

impl PersonaInjector {
    /// Load every persona bound in `bindings`, prepend a role heading to
    /// each, and inject them as one section in stable role-sorted order.
    pub fn sync(&self, host_path: &Path, library: &Library, bindings: &BTreeMap<String, String>) -> Result<(), DdxError> {
        if bindings.is_empty() {
            return self.inner.remove(host_path);
        }

        let mut sources = Vec::with_capacity(bindings.len());
        for (role, persona_name) in bindings {
            let persona = library.load_persona(persona_name)?;
            sources.push(Source {
                relative_path: format!("personas/{}.md", persona_name),
                content: format!("## Role: {}\n\n{}", role, persona.body),
            });
        }
        self.inner.inject(host_path, &sources)
    }

    pub fn remove(&self, host_path: &Path) -> Result<(), DdxError> {
        self.inner.remove(host_path)
    }

    pub fn is_in_sync(&self, host_path: &Path, library: &Library) -> Result<bool, DdxError> {
        self.inner.is_in_sync(host_path, &library.root)
    }

    pub fn current_sources(&self, host_path: &Path) -> Result<Vec<String>, DdxError> {
        self.inner.current_sources(host_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn build_library(dir: &Path) -> Library {
        std::fs::create_dir_all(dir.join("personas")).unwrap();
        std::fs::write(dir.join("personas").join("architect.md"), "Designs systems.").unwrap();
        std::fs::write(dir.join("personas").join("reviewer.md"), "Finds bugs.").unwrap();
        Library::new(dir.to_path_buf())
    }

    #[test]
    fn sync_orders_by_role() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let host = dir.path().join("CLAUDE.md");

        let mut bindings = BTreeMap::new();
        bindings.insert("zzz-last".to_string(), "reviewer".to_string());
        bindings.insert("aaa-first".to_string(), "architect".to_string());

        let injector = PersonaInjector::default();
        injector.sync(&host, &library, &bindings).unwrap();

        let text = std::fs::read_to_string(&host).unwrap();
        let architect_pos = text.find("Designs systems.").unwrap();
        let reviewer_pos = text.find("Finds bugs.").unwrap();
        assert!(architect_pos < reviewer_pos);
    }

    #[test]
    fn empty_bindings_removes_section() {
        let dir = tempdir().unwrap();
        let library = build_library(dir.path());
        let host = dir.path().join("CLAUDE.md");

        let mut bindings = BTreeMap::new();
        bindings.insert("architect".to_string(), "architect".to_string());
        let injector = PersonaInjector::default();
        injector.sync(&host, &library, &bindings).unwrap();

        injector.sync(&host, &library, &BTreeMap::new()).unwrap();
        let text = std::fs::read_to_string(&host).unwrap();
        assert!(!text.contains(MARKER));
    }
}
