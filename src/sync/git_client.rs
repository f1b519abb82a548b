//! `GitClient` — the narrow capability interface spec §9 asks for: "the
//! engine shells out to the user's git binary... abstracts this behind a
//! narrow GitClient capability interface so tests can substitute a
//! deterministic in-memory fake."
//!
//! `git subtree` has no libgit2 equivalent, so [`RealGitClient`] shells out
//! to the `git` binary for subtree plumbing while using `git2` for
//! read-only introspection (current HEAD, commit listing) it needs
//! internally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{ddx_err, DdxError, ErrorCode};

pub trait GitClient {
    fn subtree_add(&self, prefix: &str, repo_url: &str, branch: &str, squash: bool) -> Result<String, DdxError>;
    fn subtree_pull(&self, prefix: &str, repo_url: &str, branch: &str, squash: bool) -> Result<String, DdxError>;
    fn subtree_split(&self, prefix: &str, branch_name: &str) -> Result<String, DdxError>;
    fn fetch(&self, repo_url: &str, branch: &str) -> Result<String, DdxError>;
    fn push(&self, repo_url: &str, local_ref: &str, remote_branch: &str) -> Result<(), DdxError>;
    fn current_head(&self) -> Result<String, DdxError>;
    fn file_at_commit(&self, commit: &str, relative_path: &str) -> Result<Option<String>, DdxError>;
    /// All blob paths reachable from `commit`'s tree, used by `Pull` to
    /// enumerate what changed upstream without a checked-out worktree.
    fn list_files_at_commit(&self, commit: &str) -> Result<Vec<String>, DdxError>;
}

/// Shells out to `git` for subtree operations, and where introspection
/// alone is needed falls back to `git2` against the same working tree.
pub struct RealGitClient {
    pub repo_root: PathBuf,
}

impl RealGitClient {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    fn run(&self, args: &[&str]) -> Result<String, DdxError> {
        debug!(args = ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to spawn git").with_cause(e.into()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_git_error(&stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn open_repo(&self) -> Result<git2::Repository, DdxError> {
        git2::Repository::open(&self.repo_root).map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to open repository").with_cause(e.into()))
    }
}

fn classify_git_error(stderr: &str) -> DdxError {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication") || lower.contains("permission denied") || lower.contains("could not read username") {
        ddx_err!(ErrorCode::ErrAuthRequired, "git authentication failed: {}", stderr.trim())
            .with_suggestion("configure credentials for the upstream repository (e.g. via a credential helper or SSH key)")
    } else if lower.contains("could not resolve host") || lower.contains("connection") || lower.contains("timed out") {
        ddx_err!(ErrorCode::ErrNetwork, "git network error: {}", stderr.trim())
    } else {
        ddx_err!(ErrorCode::ErrGit, "git failed: {}", stderr.trim())
    }
}

impl GitClient for RealGitClient {
    fn subtree_add(&self, prefix: &str, repo_url: &str, branch: &str, squash: bool) -> Result<String, DdxError> {
        let mut args = vec!["subtree", "add", "--prefix", prefix, repo_url, branch];
        if squash {
            args.push("--squash");
        }
        with_retry(|| self.run(&args))
    }

    fn subtree_pull(&self, prefix: &str, repo_url: &str, branch: &str, squash: bool) -> Result<String, DdxError> {
        let mut args = vec!["subtree", "pull", "--prefix", prefix, repo_url, branch];
        if squash {
            args.push("--squash");
        }
        with_retry(|| self.run(&args))
    }

    fn subtree_split(&self, prefix: &str, branch_name: &str) -> Result<String, DdxError> {
        self.run(&["subtree", "split", "--prefix", prefix, "--branch", branch_name])
    }

    fn fetch(&self, repo_url: &str, branch: &str) -> Result<String, DdxError> {
        with_retry(|| self.run(&["fetch", repo_url, branch]))?;
        self.run(&["rev-parse", "FETCH_HEAD"])
    }

    fn push(&self, repo_url: &str, local_ref: &str, remote_branch: &str) -> Result<(), DdxError> {
        with_retry(|| self.run(&["push", repo_url, &format!("{}:{}", local_ref, remote_branch)])).map(|_| ())
    }

    fn current_head(&self) -> Result<String, DdxError> {
        let repo = self.open_repo()?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to resolve HEAD").with_cause(e.into()))?;
        Ok(head.id().to_string())
    }

    fn file_at_commit(&self, commit: &str, relative_path: &str) -> Result<Option<String>, DdxError> {
        let repo = self.open_repo()?;
        let oid = git2::Oid::from_str(commit).map_err(|e| ddx_err!(ErrorCode::ErrGit, "invalid commit id '{}'", commit).with_cause(e.into()))?;
        let commit = repo.find_commit(oid).map_err(|e| ddx_err!(ErrorCode::ErrGit, "commit '{}' not found", oid).with_cause(e.into()))?;
        let tree = commit.tree().map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to read tree").with_cause(e.into()))?;

        match tree.get_path(Path::new(relative_path)) {
            Ok(entry) => {
                let blob = entry
                    .to_object(&repo)
                    .and_then(|o| o.peel_to_blob())
                    .map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to read blob for {}", relative_path).with_cause(e.into()))?;
                Ok(Some(String::from_utf8_lossy(blob.content()).to_string()))
            }
            Err(_) => Ok(None),
        }
    }

    fn list_files_at_commit(&self, commit: &str) -> Result<Vec<String>, DdxError> {
        let repo = self.open_repo()?;
        let oid = git2::Oid::from_str(commit).map_err(|e| ddx_err!(ErrorCode::ErrGit, "invalid commit id '{}'", commit).with_cause(e.into()))?;
        let commit = repo.find_commit(oid).map_err(|e| ddx_err!(ErrorCode::ErrGit, "commit '{}' not found", oid).with_cause(e.into()))?;
        let tree = commit.tree().map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to read tree").with_cause(e.into()))?;

        let mut paths = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                let name = entry.name().unwrap_or_default();
                paths.push(format!("{}{}", root, name));
            }
            git2::TreeWalkResult::Ok
        })
        .map_err(|e| ddx_err!(ErrorCode::ErrGit, "failed to walk tree for {}", commit.id()).with_cause(e.into()))?;
        Ok(paths)
    }
}

/// 1s, 2s, 4s backoff, max 3 attempts (spec §4.F "Network errors").
fn with_retry<T>(mut op: impl FnMut() -> Result<T, DdxError>) -> Result<T, DdxError> {
    let delays_ms = [1000u64, 2000, 4000];
    let mut last_err = None;
    for (attempt, delay) in delays_ms.iter().enumerate() {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.code == ErrorCode::ErrNetwork => {
                warn!(attempt = attempt + 1, "network error, retrying");
                std::thread::sleep(std::time::Duration::from_millis(*delay));
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| ddx_err!(ErrorCode::ErrNetwork, "exhausted retries")))
}

/// An in-memory fake for tests: no subprocess, no repository.
#[derive(Default)]
pub struct FakeGitClient {
    pub files_by_commit: HashMap<String, HashMap<String, String>>,
    pub head: String,
    pub fail_with_auth_error: bool,
}

impl FakeGitClient {
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            files_by_commit: HashMap::new(),
            head: head.into(),
            fail_with_auth_error: false,
        }
    }

    pub fn with_commit(mut self, commit: &str, files: HashMap<String, String>) -> Self {
        self.files_by_commit.insert(commit.to_string(), files);
        self
    }
}

impl GitClient for FakeGitClient {
    fn subtree_add(&self, _prefix: &str, _repo_url: &str, _branch: &str, _squash: bool) -> Result<String, DdxError> {
        if self.fail_with_auth_error {
            return Err(ddx_err!(ErrorCode::ErrAuthRequired, "fake auth failure"));
        }
        Ok(self.head.clone())
    }

    fn subtree_pull(&self, _prefix: &str, _repo_url: &str, _branch: &str, _squash: bool) -> Result<String, DdxError> {
        Ok(self.head.clone())
    }

    fn subtree_split(&self, _prefix: &str, _branch_name: &str) -> Result<String, DdxError> {
        Ok(self.head.clone())
    }

    fn fetch(&self, _repo_url: &str, _branch: &str) -> Result<String, DdxError> {
        Ok(self.head.clone())
    }

    fn push(&self, _repo_url: &str, _local_ref: &str, _remote_branch: &str) -> Result<(), DdxError> {
        if self.fail_with_auth_error {
            return Err(ddx_err!(ErrorCode::ErrAuthRequired, "fake auth failure"));
        }
        Ok(())
    }

    fn current_head(&self) -> Result<String, DdxError> {
        Ok(self.head.clone())
    }

    fn file_at_commit(&self, commit: &str, relative_path: &str) -> Result<Option<String>, DdxError> {
        Ok(self.files_by_commit.get(commit).and_then(|files| files.get(relative_path)).cloned())
    }

    fn list_files_at_commit(&self, commit: &str) -> Result<Vec<String>, DdxError> {
        Ok(self
            .files_by_commit
            .get(commit)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }
}
