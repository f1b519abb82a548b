//! Thin demonstration CLI adapter over `ddx_core`. Not part of the
//! crate's contract (spec §6): it wires each subcommand to the matching
//! library call and maps `DdxError::exit_code()` to the process exit
//! status, nothing more.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ddx_core::config::Overrides;
use ddx_core::sync::{PullOptions, PushOptions};
use ddx_core::{DdxError, Ddx};

#[derive(Parser)]
#[command(name = "ddx", version, about = "Developer-experience library sync, workflow, and persona toolkit")]
struct Cli {
    #[arg(long, global = true)]
    library_base_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the library subtree and write the default project config.
    Init {
        #[arg(long)]
        repo_url: Option<String>,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        force: bool,
    },
    /// Pull upstream changes and resynchronize the meta-prompt section.
    Update {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        selective: Vec<String>,
    },
    /// Push local library modifications upstream as a contribution.
    Contribute {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Report sync, workflow, and injector state.
    Status,
    /// Validate config and library referents.
    Doctor,
    /// Workflow instance operations.
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Route a raw agent utterance to an active workflow, if any.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Print the resolved effective configuration.
    Config,
    /// Print the binary's version.
    Version,
}

#[derive(Subcommand)]
enum WorkflowAction {
    Init { name: String },
    Advance { name: String },
    Complete { name: String },
    Status { name: String },
    Abandon { name: String, reason: String },
}

#[derive(Subcommand)]
enum AgentAction {
    Request { utterance: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let overrides = Overrides {
        library_base_path: cli.library_base_path.clone(),
        values: Default::default(),
    };

    match run(cli, &overrides) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            exit_code(&e)
        }
    }
}

fn exit_code(e: &DdxError) -> ExitCode {
    ExitCode::from(e.exit_code() as u8)
}

fn run(cli: Cli, overrides: &Overrides) -> ddx_core::Result<()> {
    let project_root = std::env::current_dir().map_err(|e| {
        ddx_core::DdxError::new(ddx_core::ErrorCode::ErrIo, "failed to determine current directory").with_cause(e.into())
    })?;

    match cli.command {
        Command::Version => {
            println!("ddx {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Init { repo_url, branch, force } => {
            let mut config = ddx_core::config::load(&project_root, overrides)?;
            if let Some(url) = repo_url {
                config.library.repository.url = url;
            }
            config.library.repository.branch = branch;
            ddx_core::config::save(&project_root, &config)?;

            let git = ddx_core::sync::RealGitClient::new(project_root.clone());
            let engine = ddx_core::sync::SyncEngine::new(project_root, config.library.repository.clone(), &git);
            engine.init(force)?;
            println!("library initialized");
            Ok(())
        }
        Command::Update { dry_run, selective } => {
            let ddx = Ddx::open(&project_root, overrides)?;
            let git = ddx.real_git_client();
            let engine = ddx.sync_engine(&git);
            let options = PullOptions {
                selective: if selective.is_empty() { None } else { Some(selective) },
                dry_run,
            };
            let result = engine.pull(options)?;
            println!(
                "applied={} merged={} conflicted={} skipped={} backup={}",
                result.applied.len(),
                result.merged.len(),
                result.conflicted.len(),
                result.skipped.len(),
                result.backup_id
            );

            let host_path = project_root.join(ddx_core::injector::DEFAULT_HOST_FILE);
            let injector = ddx_core::injector::MetaPromptInjector::default();
            let system = &ddx.config().system;
            injector.sync(&host_path, ddx.library(), system.meta_prompt_path(), system.meta_prompt_explicit_null())?;

            if !result.conflicted.is_empty() {
                return Err(ddx_core::DdxError::new(
                    ddx_core::ErrorCode::ErrSyncConflict,
                    format!("{} file(s) left with unresolved conflicts", result.conflicted.len()),
                ));
            }
            Ok(())
        }
        Command::Contribute { dry_run, branch } => {
            let ddx = Ddx::open(&project_root, overrides)?;
            let git = ddx.real_git_client();
            let engine = ddx.sync_engine(&git);
            let result = engine.push(PushOptions {
                branch,
                dry_run,
                ..Default::default()
            })?;
            println!("branch={} commit={} compare_url={}", result.branch, result.commit, result.compare_url);
            Ok(())
        }
        Command::Status => {
            let ddx = Ddx::open(&project_root, overrides)?;
            let git = ddx.real_git_client();
            let engine = ddx.sync_engine(&git);
            let status = engine.status()?;
            println!(
                "imported_commit={:?} upstream_commit={:?} local_modifications={} conflicts={}",
                status.imported_commit,
                status.upstream_commit,
                status.local_modifications.len(),
                status.conflicts.len()
            );
            Ok(())
        }
        Command::Doctor => {
            let ddx = Ddx::open(&project_root, overrides)?;
            let violations = ddx_core::config::validate(ddx.config());
            for v in &violations {
                println!("config: {} — expected {}, observed {}", v.path, v.expected, v.observed);
            }
            let referents = ddx.library().validate_referents(ddx.config());
            for r in &referents {
                println!("library: missing referent '{}' at {}", r.referent, r.path);
            }
            let host_path = project_root.join(ddx_core::injector::DEFAULT_HOST_FILE);
            match ddx_core::injector::MetaPromptInjector::default().is_in_sync(&host_path, ddx.library()) {
                Ok(true) => println!("Meta-prompt sync: ok"),
                Ok(false) => println!("Meta-prompt sync: warning — out of sync (suggestion: run 'ddx update' to sync)"),
                Err(e) => println!("Meta-prompt sync: warning — {}", e),
            }
            Ok(())
        }
        Command::Workflow { action } => run_workflow_action(&project_root, overrides, action),
        Command::Agent { action } => {
            let AgentAction::Request { utterance } = action;
            let ddx = Ddx::open(&project_root, overrides)?;
            let decision = ddx.route(&utterance);
            print!("{}", ddx_core::router::render(&decision));
            Ok(())
        }
        Command::Config => {
            let config = ddx_core::config::load(&project_root, overrides)?;
            let serialized = serde_yaml::to_string(&config)
                .map_err(|e| ddx_core::DdxError::new(ddx_core::ErrorCode::ErrConfigInvalid, "failed to render config").with_cause(e.into()))?;
            print!("{}", serialized);
            Ok(())
        }
    }
}

fn run_workflow_action(project_root: &std::path::Path, overrides: &Overrides, action: WorkflowAction) -> ddx_core::Result<()> {
    let ddx = Ddx::open(project_root, overrides)?;
    let engine = ddx.workflow_engine();

    match action {
        WorkflowAction::Init { name } => {
            let instance_id = engine.init_instance(&name)?;
            println!("instance={}", instance_id);
        }
        WorkflowAction::Advance { name } => match engine.advance(&name)? {
            ddx_core::workflow::AdvanceResult::Started(phase) => println!("started phase {}", phase),
            ddx_core::workflow::AdvanceResult::Blocked(reasons) => {
                for r in reasons {
                    println!("blocked: {}", r.0);
                }
            }
            ddx_core::workflow::AdvanceResult::AlreadyComplete => println!("workflow already complete"),
        },
        WorkflowAction::Complete { name } => match engine.complete_phase(&name)? {
            ddx_core::workflow::CompleteResult::Completed(phase) => println!("completed phase {}", phase),
            ddx_core::workflow::CompleteResult::Unmet(reasons) => {
                for r in reasons {
                    println!("unmet: {}", r.0);
                }
            }
        },
        WorkflowAction::Status { name } => {
            let status = engine.status(&name)?;
            println!(
                "{} phase={} status={:?} {}/{}",
                status.workflow, status.current_phase, status.workflow_status, status.phases_completed, status.phases_total
            );
        }
        WorkflowAction::Abandon { name, reason } => {
            engine.abandon(&name, &reason)?;
            println!("abandoned");
        }
    }
    Ok(())
}
