//! Update-Check Cache — spec §4.B.
//!
//! A TTL-gated, fail-silent version check. `MaybeCheck` never returns an
//! error: every failure mode (disabled, network, parse) is folded into
//! `check_error` on the cached result and logged to stderr as a warning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ddx_err, DdxError, ErrorCode};
use crate::paths::{atomic_write, update_cache_path};

pub const DEFAULT_FREQUENCY_SECS: u64 = 24 * 60 * 60;
const NETWORK_TIMEOUT: Duration = Duration::from_millis(500);
const VERSION_ENDPOINT: &str = "https://crates.io/api/v1/crates/ddx";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateCacheEntry {
    pub last_check: Option<chrono::DateTime<chrono::Utc>>,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CratesIoResponse {
    #[serde(rename = "crate")]
    krate: CratesIoCrate,
}

#[derive(Debug, Deserialize)]
struct CratesIoCrate {
    max_stable_version: String,
}

/// Reads/writes `~/.cache/ddx/last-update-check.json` and performs the
/// (at most once per TTL window) network round-trip.
pub struct UpdateChecker {
    cache_path: PathBuf,
    frequency: Duration,
    disabled: bool,
}

impl UpdateChecker {
    pub fn new(frequency_secs: u64, enabled: bool) -> Self {
        let disabled = !enabled || std::env::var("DDX_DISABLE_UPDATE_CHECK").as_deref() == Ok("1");
        Self {
            cache_path: update_cache_path().unwrap_or_else(|| PathBuf::from(".ddx-update-cache.json")),
            frequency: Duration::from_secs(frequency_secs),
            disabled,
        }
    }

    fn read_cache(&self) -> Option<UpdateCacheEntry> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_cache(&self, entry: &UpdateCacheEntry) {
        if let Ok(serialized) = serde_json::to_string_pretty(entry) {
            if let Err(e) = atomic_write(&self.cache_path, serialized.as_bytes()) {
                warn!(error = %e, "failed to persist update-check cache");
            }
        }
    }

    fn is_stale(&self, entry: &UpdateCacheEntry) -> bool {
        match entry.last_check {
            None => true,
            Some(last) => chrono::Utc::now().signed_duration_since(last).to_std().unwrap_or(Duration::MAX) > self.frequency,
        }
    }

    /// Performs the check if the cache is stale (or absent) and the check
    /// is not disabled; never returns an error to the caller. A disabled
    /// check is a true no-op: it does not touch the cache file (spec §4.B
    /// "priority skip rules").
    pub fn maybe_check(&self, current_version: &str) -> UpdateCacheEntry {
        if self.disabled {
            return UpdateCacheEntry {
                current_version: current_version.to_string(),
                ..Default::default()
            };
        }

        if let Some(cached) = self.read_cache() {
            if !self.is_stale(&cached) {
                return cached;
            }
        }

        let entry = match fetch_latest_version(current_version) {
            Ok(latest) => UpdateCacheEntry {
                last_check: Some(chrono::Utc::now()),
                update_available: is_newer(&latest, current_version),
                current_version: current_version.to_string(),
                latest_version: Some(latest),
                check_error: None,
            },
            Err(e) => {
                warn!("Warning: Could not check for updates: {}", e);
                UpdateCacheEntry {
                    last_check: Some(chrono::Utc::now()),
                    current_version: current_version.to_string(),
                    latest_version: None,
                    update_available: false,
                    check_error: Some(e.to_string()),
                }
            }
        };
        self.write_cache(&entry);
        entry
    }

    /// Read-only accessor over whatever is currently cached, without
    /// triggering a network call.
    pub fn last_result(&self) -> Option<UpdateCacheEntry> {
        self.read_cache()
    }
}

fn fetch_latest_version(_current_version: &str) -> Result<String, DdxError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(NETWORK_TIMEOUT)
        .build()
        .map_err(|e| ddx_err!(ErrorCode::ErrNetwork, "failed to build HTTP client").with_cause(e.into()))?;

    let response: CratesIoResponse = client
        .get(VERSION_ENDPOINT)
        .header("User-Agent", "ddx-update-checker")
        .send()
        .map_err(|e| ddx_err!(ErrorCode::ErrNetwork, "update-check request failed").with_cause(e.into()))?
        .error_for_status()
        .map_err(|e| ddx_err!(ErrorCode::ErrNetwork, "update-check endpoint returned an error").with_cause(e.into()))?
        .json()
        .map_err(|e| ddx_err!(ErrorCode::ErrNetwork, "failed to parse update-check response").with_cause(e.into()))?;

    Ok(response.krate.max_stable_version)
}

fn is_newer(latest: &str, current: &str) -> bool {
    parse_semver(latest) > parse_semver(current)
}

fn parse_semver(v: &str) -> (u64, u64, u64) {
    let mut parts = v.trim_start_matches('v').split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn disabled_check_does_not_touch_cache() {
        let dir = tempdir().unwrap();
        let mut checker = UpdateChecker::new(DEFAULT_FREQUENCY_SECS, false);
        checker.cache_path = dir.path().join("last-update-check.json");

        let result = checker.maybe_check("1.0.0");
        assert!(result.check_error.is_none());
        assert!(!result.update_available);
        assert!(!checker.cache_path.is_file());
    }

    #[test]
    fn fresh_cache_is_used_without_a_network_call() {
        let dir = tempdir().unwrap();
        let mut checker = UpdateChecker::new(DEFAULT_FREQUENCY_SECS, true);
        checker.cache_path = dir.path().join("last-update-check.json");

        let fresh = UpdateCacheEntry {
            last_check: Some(chrono::Utc::now()),
            current_version: "1.0.0".to_string(),
            latest_version: Some("1.0.0".to_string()),
            update_available: false,
            check_error: None,
        };
        checker.write_cache(&fresh);

        let result = checker.maybe_check("1.0.0");
        assert_eq!(result, fresh);
    }

    #[test]
    fn is_newer_compares_semver_numerically() {
        assert!(is_newer("1.10.0", "1.9.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("0.9.0", "1.0.0"));
    }

    #[test]
    fn stale_cache_is_considered_due_for_a_check() {
        let checker = UpdateChecker::new(1, true);
        let stale = UpdateCacheEntry {
            last_check: Some(chrono::Utc::now() - chrono::Duration::seconds(5)),
            ..Default::default()
        };
        assert!(checker.is_stale(&stale));
    }
}
