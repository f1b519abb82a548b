//! Meta-Prompt & Persona Injector.

pub mod meta_prompt;
pub mod persona;
pub mod section;

pub use meta_prompt::MetaPromptInjector;
pub use persona::PersonaInjector;
pub use section::{Source, SectionInjector, MAX_SOURCE_BYTES};

pub const DEFAULT_HOST_FILE: &str = "CLAUDE.md";
