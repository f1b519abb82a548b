//! Persona document loading.

use std::path::Path;

use crate::error::{ddx_err, DdxError, ErrorCode};

/// A loaded persona, ready to be concatenated into an injector section.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub body: String,
}

/// Read `<library>/personas/<name>.md`, stripping any YAML front-matter
/// (a leading `---` ... `---` block) before returning the body.
pub fn load(library_root: &Path, name: &str) -> Result<Persona, DdxError> {
    let path = library_root.join("personas").join(format!("{}.md", name));
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ddx_err!(ErrorCode::ErrLibraryMissing, "persona '{}' not found at {:?}", name, path).with_cause(e.into()))?;

    Ok(Persona {
        name: name.to_string(),
        body: strip_front_matter(&raw).trim().to_string(),
    })
}

fn strip_front_matter(raw: &str) -> &str {
    let trimmed = raw.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed.strip_prefix("---\n") else {
        return raw;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn strips_front_matter() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("personas")).unwrap();
        std::fs::write(
            dir.path().join("personas").join("architect.md"),
            "---\nname: architect\n---\nYou design systems.\n",
        )
        .unwrap();

        let persona = load(dir.path(), "architect").unwrap();
        assert_eq!(persona.body, "You design systems.");
    }

    #[test]
    fn missing_persona_is_library_missing() {
        let dir = tempdir().unwrap();
        let err = load(dir.path(), "nobody").unwrap_err();
        assert_eq!(err.code, ErrorCode::ErrLibraryMissing);
    }

    #[test]
    fn without_front_matter_returns_body_unchanged() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("personas")).unwrap();
        std::fs::write(dir.path().join("personas").join("plain.md"), "Just text.\n").unwrap();
        let persona = load(dir.path(), "plain").unwrap();
        assert_eq!(persona.body, "Just text.");
    }
}
