//! `${ENV_VAR}` and `${var.path}` expansion with cycle detection.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::{ddx_err, DdxError, ErrorCode};

fn placeholder_re() -> Regex {
    Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").unwrap()
}

/// A flat bag of `var.path -> raw string value` pairs that may themselves
/// contain further placeholders. `expand_all` resolves every entry,
/// failing with [`ErrorCode::ErrConfigCycle`] if the dependency graph among
/// entries has a cycle.
pub fn expand_all(values: &HashMap<String, String>) -> Result<HashMap<String, String>, DdxError> {
    let re = placeholder_re();
    let mut graph: HashMap<&str, Vec<String>> = HashMap::new();
    for (key, raw) in values {
        let deps: Vec<String> = re
            .captures_iter(raw)
            .map(|c| c[1].to_string())
            .filter(|d| values.contains_key(d))
            .collect();
        graph.insert(key.as_str(), deps);
    }

    // Iterative DFS with gray/black coloring to find a cycle, naming the
    // participants in visitation order.
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: HashMap<&str, Color> = values.keys().map(|k| (k.as_str(), Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, Vec<String>>,
        color: &mut HashMap<&'a str, Color>,
        path: &mut Vec<String>,
    ) -> Result<(), DdxError> {
        path.push(node.to_string());
        color.insert(node, Color::Gray);
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                match color.get(dep.as_str()) {
                    Some(Color::Gray) => {
                        let start = path.iter().position(|p| p == dep).unwrap_or(0);
                        let cycle = path[start..].join(" -> ");
                        return Err(ddx_err!(
                            ErrorCode::ErrConfigCycle,
                            "circular variable reference: {} -> {}",
                            cycle,
                            dep
                        ));
                    }
                    Some(Color::White) | None => {
                        visit(dep, graph, color, path)?;
                    }
                    Some(Color::Black) => {}
                }
            }
        }
        color.insert(node, Color::Black);
        path.pop();
        Ok(())
    }

    let mut path = Vec::new();
    let keys: Vec<&str> = values.keys().map(|k| k.as_str()).collect();
    for key in &keys {
        if color.get(key) == Some(&Color::White) {
            visit(key, &graph, &mut color, &mut path)?;
        }
    }

    // No cycle: resolve each value by recursively substituting, memoizing
    // as we go.
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut visiting: HashSet<String> = HashSet::new();
    resolve_into(values, &re, &mut resolved, &mut visiting)?;
    Ok(resolved)
}

fn resolve_into(
    values: &HashMap<String, String>,
    re: &Regex,
    resolved: &mut HashMap<String, String>,
    visiting: &mut HashSet<String>,
) -> Result<(), DdxError> {
    for key in values.keys() {
        resolve_one(key, values, re, resolved, visiting)?;
    }
    Ok(())
}

fn resolve_one(
    key: &str,
    values: &HashMap<String, String>,
    re: &Regex,
    resolved: &mut HashMap<String, String>,
    visiting: &mut HashSet<String>,
) -> Result<String, DdxError> {
    if let Some(v) = resolved.get(key) {
        return Ok(v.clone());
    }
    visiting.insert(key.to_string());
    let raw = values
        .get(key)
        .ok_or_else(|| ddx_err!(ErrorCode::ErrConfigCycle, "unknown variable: {}", key))?;

    let mut out = String::new();
    let mut last_end = 0;
    for caps in re.captures_iter(raw) {
        let m = caps.get(0).unwrap();
        out.push_str(&raw[last_end..m.start()]);
        let name = &caps[1];
        if let Some(value) = values.get(name) {
            out.push_str(&resolve_one(name, values, re, resolved, visiting)?);
        } else if let Ok(env) = std::env::var(name) {
            out.push_str(&env);
        } else {
            out.push_str(&m.as_str().to_string());
        }
        last_end = m.end();
    }
    out.push_str(&raw[last_end..]);

    visiting.remove(key);
    resolved.insert(key.to_string(), out.clone());
    Ok(out)
}
