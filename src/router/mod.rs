//! Agent Request Router.
//!
//! A pure function turning a raw user utterance into a routing decision:
//! no side effects, no I/O beyond the definitions the caller supplies
//! through a [`WorkflowDefinitionLoader`].

use tracing::debug;

use crate::config::Config;
use crate::library::{AgentCommand, WorkflowDefinitionLoader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    NoHandler,
    SafeWordBypass { word: String, payload: String },
    WorkflowMatch {
        workflow: String,
        subcommand: String,
        action: String,
        command: String,
        reason: String,
    },
}

/// `Route(utterance, Config) -> Decision`: safe-word bypass, then
/// per-active-workflow trigger matching, first match wins.
pub fn route(utterance: &str, config: &Config, loader: &dyn WorkflowDefinitionLoader) -> Decision {
    if config.workflows.active.is_empty() {
        return Decision::NoHandler;
    }

    let trimmed = utterance.trim();
    let safe_word = &config.workflows.safe_word;
    if let Some(rest) = strip_safe_word(trimmed, safe_word) {
        return Decision::SafeWordBypass {
            word: safe_word.clone(),
            payload: rest.to_string(),
        };
    }

    let text = trimmed.to_lowercase();

    for workflow_name in &config.workflows.active {
        let definition = match loader.load(workflow_name) {
            Ok(def) => def,
            Err(e) => {
                debug!(workflow = %workflow_name, error = %e, "skipping workflow: failed to load definition");
                continue;
            }
        };

        let Some(command) = definition.agent_commands.get("request") else {
            continue;
        };
        if !command.enabled {
            continue;
        }

        if matches_triggers(&text, command) {
            return Decision::WorkflowMatch {
                workflow: workflow_name.clone(),
                subcommand: "request".to_string(),
                action: command.action.clone(),
                command: format!("ddx workflow {} execute {} \"{}\"", workflow_name, command.action, trimmed),
                reason: command.description.clone(),
            };
        }
    }

    Decision::NoHandler
}

/// `SAFEWORD` followed by whitespace or a colon, at the start of the
/// (already-trimmed) utterance. Returns the remaining payload, trimmed.
fn strip_safe_word<'a>(trimmed: &'a str, safe_word: &str) -> Option<&'a str> {
    let rest = trimmed.strip_prefix(safe_word)?;
    let rest = rest.strip_prefix(':').or_else(|| rest.strip_prefix(char::is_whitespace))?;
    Some(rest.trim())
}

/// Any keyword matches as a whole word, OR any pattern appears as a
/// lowercase substring.
fn matches_triggers(text: &str, command: &AgentCommand) -> bool {
    command.triggers.keywords.iter().any(|k| contains_whole_word(text, &k.to_lowercase()))
        || command.triggers.patterns.iter().any(|p| text.contains(&p.to_lowercase()))
}

fn contains_whole_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(word) {
        let start = search_from + offset;
        let end = start + word.len();
        let before_ok = start == 0 || !text.as_bytes()[start - 1].is_ascii_alphanumeric();
        let after_ok = end == text.len() || !text.as_bytes()[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        search_from = start + 1;
    }
    false
}

/// Render a `Decision` as the stable, line-based stdout contract.
pub fn render(decision: &Decision) -> String {
    match decision {
        Decision::NoHandler => "NO_HANDLER\n".to_string(),
        Decision::SafeWordBypass { word, payload } => {
            format!("NO_HANDLER\nSAFE_WORD: {}\nMESSAGE: {}\n", word, payload)
        }
        Decision::WorkflowMatch {
            workflow,
            subcommand,
            action,
            command,
            reason,
        } => format!(
            "WORKFLOW: {}\nSUBCOMMAND: {}\nACTION: {}\nCOMMAND: {}\nREASON: {}\n",
            workflow, subcommand, action, command, reason
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{AgentCommand, FakeWorkflowDefinitionLoader, Triggers, WorkflowDefinition};

    fn workflow(name: &str, keywords: &[&str], action: &str, description: &str) -> WorkflowDefinition {
        let mut commands = std::collections::HashMap::new();
        commands.insert(
            "request".to_string(),
            AgentCommand {
                enabled: true,
                triggers: Triggers {
                    keywords: keywords.iter().map(|s| s.to_string()).collect(),
                    patterns: Vec::new(),
                },
                action: action.to_string(),
                description: description.to_string(),
            },
        );
        WorkflowDefinition {
            name: name.to_string(),
            version: "1.0".to_string(),
            description: String::new(),
            coordinator: None,
            tags: Vec::new(),
            phases: Vec::new(),
            agent_commands: commands,
            variables: Vec::new(),
        }
    }

    #[test]
    fn empty_active_list_is_no_handler_without_touching_loader() {
        let config = Config {
            workflows: crate::config::schema::WorkflowsConfig {
                active: Vec::new(),
                safe_word: "NODDX".to_string(),
            },
            ..Config::default()
        };
        let loader = FakeWorkflowDefinitionLoader::new();
        assert_eq!(route("add pagination", &config, &loader), Decision::NoHandler);
    }

    #[test]
    fn safe_word_bypasses_before_matching() {
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string()];
        let loader = FakeWorkflowDefinitionLoader::new().with(workflow("helix", &["add"], "frame-request", "desc"));

        let decision = route("NODDX quick edit", &config, &loader);
        assert_eq!(
            decision,
            Decision::SafeWordBypass {
                word: "NODDX".to_string(),
                payload: "quick edit".to_string(),
            }
        );
    }

    #[test]
    fn first_match_wins_across_active_workflows() {
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string(), "kanban".to_string()];
        let loader = FakeWorkflowDefinitionLoader::new()
            .with(workflow("helix", &["add"], "frame-request", "helix handles feature requests"))
            .with(workflow("kanban", &["add"], "card-request", "kanban handles feature requests"));

        let decision = route("add pagination", &config, &loader);
        assert_eq!(
            decision,
            Decision::WorkflowMatch {
                workflow: "helix".to_string(),
                subcommand: "request".to_string(),
                action: "frame-request".to_string(),
                command: "ddx workflow helix execute frame-request \"add pagination\"".to_string(),
                reason: "helix handles feature requests".to_string(),
            }
        );
    }

    #[test]
    fn keyword_must_match_as_whole_word() {
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string()];
        let loader = FakeWorkflowDefinitionLoader::new().with(workflow("helix", &["cat"], "x", "d"));
        assert_eq!(route("concatenate strings", &config, &loader), Decision::NoHandler);
    }

    #[test]
    fn disabled_request_command_is_skipped() {
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string()];
        let mut def = workflow("helix", &["add"], "x", "d");
        def.agent_commands.get_mut("request").unwrap().enabled = false;
        let loader = FakeWorkflowDefinitionLoader::new().with(def);
        assert_eq!(route("add pagination", &config, &loader), Decision::NoHandler);
    }

    #[test]
    fn render_matches_line_contract() {
        let decision = Decision::WorkflowMatch {
            workflow: "helix".to_string(),
            subcommand: "request".to_string(),
            action: "frame-request".to_string(),
            command: "ddx workflow helix execute frame-request \"add pagination\"".to_string(),
            reason: "desc".to_string(),
        };
        assert_eq!(
            render(&decision),
            "WORKFLOW: helix\nSUBCOMMAND: request\nACTION: frame-request\nCOMMAND: ddx workflow helix execute frame-request \"add pagination\"\nREASON: desc\n"
        );
    }
}
