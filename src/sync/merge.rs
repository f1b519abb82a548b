//! Three-way text merge (spec §4.F "Three-way merge semantics").
//!
//! Uses `similar` to diff base→ours and base→theirs into line ranges,
//! then walks both edit lists together: non-overlapping edits apply
//! cleanly, overlapping edits with identical replacement text apply once,
//! and overlapping edits that disagree become a conflict region written
//! with conventional (optionally diff3-style) markers.

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub text: String,
    pub conflicted: bool,
}

/// Merge `ours` and `theirs`, both derived from `base`. `diff3` controls
/// whether conflict regions include the base content between markers.
pub fn three_way_merge(base: &str, ours: &str, theirs: &str, diff3: bool) -> MergeOutcome {
    let base_lines: Vec<&str> = split_lines(base);
    let ours_lines: Vec<&str> = split_lines(ours);
    let theirs_lines: Vec<&str> = split_lines(theirs);

    let ours_edits = edits_from_diff(&base_lines, &ours_lines);
    let theirs_edits = edits_from_diff(&base_lines, &theirs_lines);

    let mut out: Vec<String> = Vec::new();
    let mut conflicted = false;
    let mut cursor = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;

    let copy_base = |out: &mut Vec<String>, from: usize, to: usize| {
        for line in &base_lines[from..to] {
            out.push((*line).to_string());
        }
    };

    while i < ours_edits.len() || j < theirs_edits.len() {
        let next_ours = ours_edits.get(i);
        let next_theirs = theirs_edits.get(j);

        match (next_ours, next_theirs) {
            (Some(o), Some(t)) if o.end <= t.start => {
                copy_base(&mut out, cursor, o.start);
                out.extend(o.lines.clone());
                cursor = o.end;
                i += 1;
            }
            (Some(o), Some(t)) if t.end <= o.start => {
                copy_base(&mut out, cursor, t.start);
                out.extend(t.lines.clone());
                cursor = t.end;
                j += 1;
            }
            (Some(o), Some(t)) => {
                let start = o.start.min(t.start);
                let end = o.end.max(t.end);
                copy_base(&mut out, cursor, start);
                if o.lines == t.lines {
                    out.extend(o.lines.clone());
                } else {
                    conflicted = true;
                    write_conflict(&mut out, &base_lines[start..end], &o.lines, &t.lines, diff3);
                }
                cursor = end;
                i += 1;
                j += 1;
            }
            (Some(o), None) => {
                copy_base(&mut out, cursor, o.start);
                out.extend(o.lines.clone());
                cursor = o.end;
                i += 1;
            }
            (None, Some(t)) => {
                copy_base(&mut out, cursor, t.start);
                out.extend(t.lines.clone());
                cursor = t.end;
                j += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    copy_base(&mut out, cursor, base_lines.len());

    let mut text = out.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    MergeOutcome { text, conflicted }
}

fn write_conflict(out: &mut Vec<String>, base: &[&str], ours: &[String], theirs: &[String], diff3: bool) {
    out.push("<<<<<<< ours".to_string());
    out.extend(ours.iter().cloned());
    if diff3 {
        out.push("||||||| base".to_string());
        out.extend(base.iter().map(|s| s.to_string()));
    }
    out.push("=======".to_string());
    out.extend(theirs.iter().cloned());
    out.push(">>>>>>> theirs".to_string());
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.lines().collect()
    }
}

fn edits_from_diff(base: &[&str], other: &[&str]) -> Vec<Edit> {
    let diff = TextDiff::from_slices(base, other);
    let mut edits = Vec::new();
    let mut base_idx = 0usize;
    let mut pending_delete: Option<(usize, usize)> = None;

    // `similar`'s grouped changes don't directly expose Replace ranges for
    // slice diffing the way `ops()` does for some backends, so we fold
    // consecutive Delete+Insert change runs at the same base position into
    // one Edit (a "replace"), matching diff3's hunk granularity.
    let mut other_buffer: Vec<String> = Vec::new();
    let mut delete_len = 0usize;

    let flush = |edits: &mut Vec<Edit>, pending_delete: &mut Option<(usize, usize)>, other_buffer: &mut Vec<String>, delete_len: &mut usize| {
        if let Some((start, _)) = pending_delete.take() {
            edits.push(Edit {
                start,
                end: start + *delete_len,
                lines: std::mem::take(other_buffer),
            });
        }
        *delete_len = 0;
    };

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                flush(&mut edits, &mut pending_delete, &mut other_buffer, &mut delete_len);
                base_idx += 1;
            }
            ChangeTag::Delete => {
                if pending_delete.is_none() {
                    pending_delete = Some((base_idx, 0));
                }
                delete_len += 1;
                base_idx += 1;
            }
            ChangeTag::Insert => {
                if pending_delete.is_none() {
                    pending_delete = Some((base_idx, 0));
                }
                other_buffer.push(change.value().to_string());
            }
        }
    }
    flush(&mut edits, &mut pending_delete, &mut other_buffer, &mut delete_len);
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_overlapping_changes_apply_cleanly() {
        let base = "a\nb\nc\n";
        let ours = "a\nB\nc\n";
        let theirs = "a\nb\nC\n";
        let outcome = three_way_merge(base, ours, theirs, false);
        assert!(!outcome.conflicted);
        assert_eq!(outcome.text, "a\nB\nC\n");
    }

    #[test]
    fn identical_edit_on_both_sides_applies_once() {
        let base = "version: 1.0.0\n";
        let ours = "version: 2.0.0\n";
        let theirs = "version: 2.0.0\n";
        let outcome = three_way_merge(base, ours, theirs, false);
        assert!(!outcome.conflicted);
        assert_eq!(outcome.text, "version: 2.0.0\n");
    }

    #[test]
    fn conflicting_edit_produces_markers() {
        let base = "\"version\": \"1.0.0\"\n";
        let ours = "\"version\": \"2.0.0\"\n";
        let theirs = "\"version\": \"1.5.0\"\n";
        let outcome = three_way_merge(base, ours, theirs, false);
        assert!(outcome.conflicted);
        assert!(outcome.text.contains("<<<<<<< ours"));
        assert!(outcome.text.contains("\"version\": \"2.0.0\""));
        assert!(outcome.text.contains("======="));
        assert!(outcome.text.contains("\"version\": \"1.5.0\""));
        assert!(outcome.text.contains(">>>>>>> theirs"));
    }

    #[test]
    fn diff3_mode_includes_base_region() {
        let base = "x\n";
        let ours = "y\n";
        let theirs = "z\n";
        let outcome = three_way_merge(base, ours, theirs, true);
        assert!(outcome.text.contains("||||||| base"));
        assert!(outcome.text.contains("x"));
    }

    #[test]
    fn trivial_merge_where_remote_equals_base_is_a_no_op() {
        let base = "a\nb\n";
        let outcome = three_way_merge(base, base, base, false);
        assert!(!outcome.conflicted);
        assert_eq!(outcome.text, base);
    }
}
