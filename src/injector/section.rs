//! The shared idempotent section-replacement algorithm.
//!
//! `MetaPromptInjector` and `PersonaInjector` are thin configuration
//! wrappers around [`SectionInjector`], which owns the marker contract,
//! the 512 KB source-file ceiling, and the truncated-end-marker
//! tolerance.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::atomic_write;

pub const MAX_SOURCE_BYTES: u64 = 512 * 1024;

/// One named source file contributing to an injected section.
#[derive(Debug, Clone)]
pub struct Source {
    /// Path relative to the library root, used in the `Source:` comment.
    pub relative_path: String,
    pub content: String,
}

/// A section owned by one injector instance within a host file, delimited
/// by `<!-- <marker>:START -->` / `<!-- <marker>:END -->`.
pub struct SectionInjector {
    pub marker: String,
}

impl SectionInjector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    fn start_marker(&self) -> String {
        format!("<!-- {}:START -->", self.marker)
    }

    fn end_marker(&self) -> String {
        format!("<!-- {}:END -->", self.marker)
    }

    /// Read the host file, or synthesize a minimal default preamble if it
    /// does not exist yet.
    fn read_host(&self, host_path: &Path) -> Result<String, DdxError> {
        match std::fs::read_to_string(host_path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(ddx_err!(ErrorCode::ErrIo, "failed to read {:?}", host_path).with_cause(e.into())),
        }
    }

    /// Remove this instance's section from `host`, returning the trimmed
    /// body. Tolerant of a missing end marker: everything from the start
    /// marker to end-of-file is treated as a truncated section and
    /// removed.
    fn strip_section(&self, host: &str) -> String {
        let start = self.start_marker();
        let end = self.end_marker();
        let Some(start_idx) = host.find(&start) else {
            return host.to_string();
        };
        let before = &host[..start_idx];
        let after = match host[start_idx..].find(&end) {
            Some(rel_end) => &host[start_idx + rel_end + end.len()..],
            None => {
                warn!(marker = %self.marker, "section end marker missing, treating as truncated");
                ""
            }
        };
        format!("{}{}", before.trim_end(), after)
    }

    /// Validate each source against the size ceiling and the sentinel
    /// content-escape rule.
    fn validate_sources(&self, sources: &[Source]) -> Result<(), DdxError> {
        let start = self.start_marker();
        let end = self.end_marker();
        for source in sources {
            if source.content.len() as u64 > MAX_SOURCE_BYTES {
                return Err(ddx_err!(
                    ErrorCode::ErrConfigInvalid,
                    "source '{}' exceeds the {} byte limit",
                    source.relative_path,
                    MAX_SOURCE_BYTES
                ));
            }
            if source.content.contains(&start) || source.content.contains(&end) {
                return Err(ddx_err!(
                    ErrorCode::ErrConfigInvalid,
                    "source '{}' contains a literal sentinel marker",
                    source.relative_path
                ));
            }
        }
        Ok(())
    }

    fn build_section(&self, sources: &[Source]) -> String {
        let mut section = String::new();
        section.push_str(&self.start_marker());
        section.push('\n');
        for source in sources {
            section.push_str(&format!("<!-- Source: {} -->\n", source.relative_path));
            section.push_str(source.content.trim_end());
            section.push('\n');
        }
        section.push_str(&self.end_marker());
        section
    }

    /// Inject `sources` into `host_path`, replacing any existing section
    /// for this instance. Writes atomically; on any error the prior host
    /// file is untouched.
    pub fn inject(&self, host_path: &Path, sources: &[Source]) -> Result<(), DdxError> {
        self.validate_sources(sources)?;
        let host = self.read_host(host_path)?;
        let trimmed = self.strip_section(&host);
        let section = self.build_section(sources);

        let mut out = trimmed.trim_end().to_string();
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&section);
        out.push('\n');

        atomic_write(host_path, out.as_bytes())?;
        debug!(marker = %self.marker, sources = sources.len(), "injected section");
        Ok(())
    }

    /// Remove this instance's section. Idempotent: a host file without
    /// the section is not an error.
    pub fn remove(&self, host_path: &Path) -> Result<(), DdxError> {
        let host = self.read_host(host_path)?;
        if !host.contains(&self.start_marker()) {
            return Ok(());
        }
        let trimmed = self.strip_section(&host);
        let mut out = trimmed.trim_end().to_string();
        if !out.is_empty() {
            out.push('\n');
        }
        atomic_write(host_path, out.as_bytes())
    }

    /// Extract this instance's current section, parsed into declared
    /// source paths and the concatenated body between `Source:` comments.
    fn current_section(&self, host: &str) -> Result<Option<ParsedSection>, DdxError> {
        let start = self.start_marker();
        let Some(start_idx) = host.find(&start) else {
            return Ok(None);
        };
        let end = self.end_marker();
        let body_start = start_idx + start.len();
        let body = match host[start_idx..].find(&end) {
            Some(rel_end) => &host[body_start..start_idx + rel_end],
            None => {
                return Err(ddx_err!(ErrorCode::ErrConfigInvalid, "malformed section: missing end marker"));
            }
        };

        let mut sources = Vec::new();
        let mut content = String::new();
        for line in body.lines() {
            if let Some(rest) = line.strip_prefix("<!-- Source: ").and_then(|s| s.strip_suffix(" -->")) {
                sources.push(rest.to_string());
            } else {
                content.push_str(line);
                content.push('\n');
            }
        }

        Ok(Some(ParsedSection {
            sources,
            content: content.trim().to_string(),
        }))
    }

    /// Returns whether the section is in sync, by normalizing whitespace
    /// on both the current section content and the freshly-loaded library
    /// sources, then comparing exactly.
    pub fn is_in_sync(&self, host_path: &Path, library_root: &Path) -> Result<bool, DdxError> {
        let host = self.read_host(host_path)?;
        let Some(parsed) = self.current_section(&host)? else {
            return Ok(false);
        };

        let mut fresh = String::new();
        for relative_path in &parsed.sources {
            let full = library_root.join(relative_path);
            let text = std::fs::read_to_string(&full)
                .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "source {:?} no longer exists", full).with_cause(e.into()))?;
            fresh.push_str(text.trim_end());
            fresh.push('\n');
        }

        Ok(normalize(&parsed.content) == normalize(fresh.trim()))
    }

    /// The declared sources of the current section, for diagnostics.
    pub fn current_sources(&self, host_path: &Path) -> Result<Vec<String>, DdxError> {
        let host = self.read_host(host_path)?;
        Ok(self.current_section(&host)?.map(|p| p.sources).unwrap_or_default())
    }
}

struct ParsedSection {
    sources: Vec<String>,
    content: String,
}

fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn library_relative(library_root: &Path, full: &Path) -> PathBuf {
    full.strip_prefix(library_root).map(PathBuf::from).unwrap_or_else(|_| full.to_path_buf())
}
