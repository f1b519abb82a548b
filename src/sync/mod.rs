//! Upstream Synchronization Engine — spec §4.F.

pub mod backup;
pub mod conflict;
pub mod engine;
pub mod git_client;
pub mod merge;
pub mod secrets;
pub mod state;

pub use backup::{BackupInfo, Manifest};
pub use conflict::{Conflict, Resolution};
pub use engine::{PullOptions, PullResult, PushOptions, PushResult, SyncEngine, SyncStatus};
pub use git_client::{FakeGitClient, GitClient, RealGitClient};
pub use merge::{three_way_merge, MergeOutcome};
pub use secrets::{SecretFinding, DEFAULT_ENTROPY_THRESHOLD};
pub use state::SyncState;
