//! The layered effective configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

pub const CURRENT_VERSION: &str = "1.0";
pub const DEFAULT_SAFE_WORD: &str = "NODDX";
pub const DEFAULT_LIBRARY_PATH: &str = "./.ddx/library";
pub const DEFAULT_UPDATE_FREQUENCY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,

    pub library: LibraryConfig,

    #[serde(default)]
    pub workflows: WorkflowsConfig,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub personas: PersonaConfig,

    #[serde(default)]
    pub update_check: UpdateCheckConfig,

    /// Unknown top-level keys, preserved verbatim across load/save so older
    /// or newer config consumers don't lose each other's data.
    #[serde(flatten)]
    pub unknown: HashMap<String, serde_yaml::Value>,
}

impl Default for Config {
    /// The zero-config value used for read-only commands when no
    /// `.ddx/config.yaml` exists.
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            library: LibraryConfig::default(),
            workflows: WorkflowsConfig::default(),
            system: SystemConfig::default(),
            personas: PersonaConfig::default(),
            update_check: UpdateCheckConfig::default(),
            unknown: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    pub path: String,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LIBRARY_PATH.to_string(),
            repository: RepositoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_subtree_path")]
    pub subtree_path: String,
    /// Network timeout for fetch/push.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_subtree_path() -> String {
    ".ddx/library".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowsConfig {
    #[serde(default)]
    pub active: Vec<String>,
    #[serde(default = "default_safe_word")]
    pub safe_word: String,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            safe_word: DEFAULT_SAFE_WORD.to_string(),
        }
    }
}

fn default_safe_word() -> String {
    DEFAULT_SAFE_WORD.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemConfig {
    /// Tri-state, not a plain optional path: the key being absent from
    /// the document and the key being present with value `null` are
    /// different instructions (spec.md:135), so this is
    /// `Option<Option<String>>` rather than `Option<String>`.
    /// - Key absent (`None`): use the built-in default meta-prompt.
    /// - `meta_prompt: null` (`Some(None)`): remove the injected section.
    /// - `meta_prompt: <path>` (`Some(Some(path))`): inject from `<path>`,
    ///   relative to the library's `prompts/` directory.
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub meta_prompt: Option<Option<String>>,
}

impl SystemConfig {
    /// `true` iff the config explicitly set `meta_prompt: null`.
    pub fn meta_prompt_explicit_null(&self) -> bool {
        matches!(self.meta_prompt, Some(None))
    }

    /// The configured meta-prompt path, if one was given. Both "key
    /// absent" and "explicit null" yield `None` here; callers that need
    /// to tell them apart use `meta_prompt_explicit_null`.
    pub fn meta_prompt_path(&self) -> Option<&str> {
        match &self.meta_prompt {
            Some(Some(path)) => Some(path.as_str()),
            _ => None,
        }
    }
}

/// Lets `#[serde(default)]` distinguish "key absent" from "key present
/// with value `null`": the attribute only calls this function when the
/// key exists at all, so a present `null` still reaches `T::deserialize`
/// (yielding `None` for `T = Option<String>`) while an absent key never
/// calls it and falls through to the field's `Default` instead.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersonaConfig {
    /// Abstract role -> concrete persona name.
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    /// Per-workflow overrides: workflow name -> (role -> persona name).
    #[serde(default)]
    pub overrides: HashMap<String, HashMap<String, String>>,
}

impl PersonaConfig {
    /// Resolve the effective persona for `role` within `workflow`, applying
    /// the per-workflow override if present.
    pub fn resolve(&self, workflow: &str, role: &str) -> Option<&str> {
        self.overrides
            .get(workflow)
            .and_then(|o| o.get(role))
            .or_else(|| self.bindings.get(role))
            .map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_update_frequency_secs")]
    pub frequency_secs: u64,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency_secs: DEFAULT_UPDATE_FREQUENCY_SECS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_update_frequency_secs() -> u64 {
    DEFAULT_UPDATE_FREQUENCY_SECS
}

/// Where a resolved library path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryOrigin {
    CliFlag,
    EnvVar,
    SelfRepo,
    ProjectLibrary,
    GlobalLibrary,
}

#[derive(Debug, Clone)]
pub struct ResolvedLibrary {
    pub path: PathBuf,
    pub origin: LibraryOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub rule: String,
    pub expected: String,
    pub observed: String,
    /// Blocking errors fail `Validate`; non-blocking ones are warnings.
    pub blocking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_prompt_absent_key_uses_builtin_default() {
        let config: Config = serde_yaml::from_str("version: \"1.0\"\nlibrary:\n  path: ./.ddx/library\n").unwrap();
        assert_eq!(config.system.meta_prompt, None);
        assert!(!config.system.meta_prompt_explicit_null());
        assert_eq!(config.system.meta_prompt_path(), None);
    }

    #[test]
    fn meta_prompt_explicit_null_is_distinguishable_from_absent() {
        let config: Config =
            serde_yaml::from_str("version: \"1.0\"\nlibrary:\n  path: ./.ddx/library\nsystem:\n  meta_prompt: null\n").unwrap();
        assert_eq!(config.system.meta_prompt, Some(None));
        assert!(config.system.meta_prompt_explicit_null());
        assert_eq!(config.system.meta_prompt_path(), None);
    }

    #[test]
    fn meta_prompt_with_path_resolves() {
        let config: Config = serde_yaml::from_str(
            "version: \"1.0\"\nlibrary:\n  path: ./.ddx/library\nsystem:\n  meta_prompt: custom/prompt.md\n",
        )
        .unwrap();
        assert_eq!(config.system.meta_prompt, Some(Some("custom/prompt.md".to_string())));
        assert!(!config.system.meta_prompt_explicit_null());
        assert_eq!(config.system.meta_prompt_path(), Some("custom/prompt.md"));
    }

    #[test]
    fn default_config_omits_meta_prompt_key_on_save() {
        let serialized = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(!serialized.contains("meta_prompt"));
    }

    #[test]
    fn explicit_null_round_trips_through_save() {
        let mut config = Config::default();
        config.system.meta_prompt = Some(None);
        let serialized = serde_yaml::to_string(&config).unwrap();
        let reloaded: Config = serde_yaml::from_str(&serialized).unwrap();
        assert!(reloaded.system.meta_prompt_explicit_null());
    }
}
