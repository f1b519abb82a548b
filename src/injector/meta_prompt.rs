//! Meta-prompt specialization.

use std::path::Path;

use crate::error::DdxError;
use crate::library::Library;

use super::section::{Source, SectionInjector};

pub const MARKER: &str = "DDX-META-PROMPT";

pub struct MetaPromptInjector {
    inner: SectionInjector,
}

impl Default for MetaPromptInjector {
    fn default() -> Self {
        Self {
            inner: SectionInjector::new(MARKER),
        }
    }
}

impl MetaPromptInjector {
    /// Inject the configured (or default) meta-prompt, or remove the
    /// section entirely when `configured` is explicitly `None`: a config
    /// that sets `meta_prompt: null` gets the section removed rather than
    /// injected.
    pub fn sync(&self, host_path: &Path, library: &Library, configured: Option<&str>, explicit_null: bool) -> Result<(), DdxError> {
        if explicit_null {
            return self.inner.remove(host_path);
        }

        let relative = configured.unwrap_or(crate::library::DEFAULT_META_PROMPT);
        let content = library.read_meta_prompt(configured)?;
        let source = Source {
            relative_path: format!("prompts/{}", relative),
            content,
        };
        self.inner.inject(host_path, std::slice::from_ref(&source))
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
