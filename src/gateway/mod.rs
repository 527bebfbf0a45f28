//! Artifact store boundary
//!
//! The cleaning step only talks to [`ArtifactStore`]. Two implementations live
//! here: a filesystem store with content-addressed payloads, and an in-memory
//! store used by tests and demos.

pub mod cas_fs;
pub mod local;
pub mod memory;

pub use local::LocalArtifactStore;
pub use memory::{MemoryArtifactStore, PublishBehavior};

use crate::constants::LATEST_ALIAS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid artifact reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("artifact '{artifact}' is corrupt: {reason}")]
    Corrupt { artifact: String, reason: String },

    #[error("store rejected the request: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contract between the cleaning step and whatever persists artifacts.
///
/// Every call that touches artifacts takes the run handle explicitly so the
/// store can record lineage without process-wide state.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Open a run and record its configuration.
    async fn start_run(
        &self,
        job_type: &str,
        config: serde_json::Value,
    ) -> Result<RunHandle, StoreError>;

    /// Resolve `reference` to a committed version and a local readable file.
    async fn fetch(
        &self,
        run: &mut RunHandle,
        reference: &ArtifactRef,
    ) -> Result<FetchedArtifact, StoreError>;

    /// Stage a new version of `draft.name` with `payload` as its only file.
    /// The version is not visible to readers until [`ArtifactStore::await_durable`]
    /// reports it durable.
    async fn publish(
        &self,
        run: &mut RunHandle,
        draft: ArtifactDraft,
        payload: &Path,
    ) -> Result<PendingPublish, StoreError>;

    /// Wait at most `timeout` for a staged version to become durable. Only a
    /// durable version is recorded as logged by `run`.
    async fn await_durable(
        &self,
        run: &mut RunHandle,
        pending: PendingPublish,
        timeout: Duration,
    ) -> DurabilityOutcome;

    /// Close the run and persist its final record.
    async fn finish_run(&self, run: RunHandle, status: RunStatus) -> Result<RunRecord, StoreError>;
}

/// Which version of an artifact a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Version(u32),
    Alias(String),
}

impl VersionSelector {
    /// Pick the matching manifest among committed versions.
    pub fn pick<'a, I>(&self, manifests: I) -> Option<&'a ArtifactManifest>
    where
        I: IntoIterator<Item = &'a ArtifactManifest>,
    {
        let mut committed = manifests.into_iter().filter(|m| m.is_committed());
        match self {
            VersionSelector::Latest => committed.max_by_key(|m| m.version),
            VersionSelector::Version(v) => committed.find(|m| m.version == *v),
            VersionSelector::Alias(alias) => committed
                .filter(|m| m.aliases.iter().any(|a| a == alias))
                .max_by_key(|m| m.version),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str(LATEST_ALIAS),
            VersionSelector::Version(v) => write!(f, "v{}", v),
            VersionSelector::Alias(alias) => f.write_str(alias),
        }
    }
}

/// A parsed `name[:version-or-alias]` reference. A bare name means `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub selector: VersionSelector,
}

impl ArtifactRef {
    pub fn parse(reference: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        let (name, selector) = match trimmed.rsplit_once(':') {
            Some((name, selector)) => (name, selector),
            None => (trimmed, LATEST_ALIAS),
        };
        validate_name(name).map_err(|e| match e {
            StoreError::InvalidReference { reason, .. } => invalid(&reason),
            other => other,
        })?;

        let selector = if selector == LATEST_ALIAS {
            VersionSelector::Latest
        } else if let Some(v) = selector
            .strip_prefix('v')
            .and_then(|digits| digits.parse::<u32>().ok())
        {
            VersionSelector::Version(v)
        } else if is_token(selector) {
            VersionSelector::Alias(selector.to_string())
        } else {
            return Err(invalid("version or alias must be 'latest', 'vN' or a plain alias"));
        };

        Ok(Self {
            name: name.to_string(),
            selector,
        })
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.selector)
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Artifact names double as directory names in the filesystem store, so they
/// are limited to ASCII letters, digits, `_`, `-` and `.`.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if is_token(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidReference {
            reference: name.to_string(),
            reason: "artifact names use ASCII letters, digits, '_', '-' and '.'".to_string(),
        })
    }
}

/// Extra aliases may not shadow `latest` or look like a `vN` version.
pub fn validate_alias(alias: &str) -> Result<(), StoreError> {
    let reserved = alias == LATEST_ALIAS
        || alias
            .strip_prefix('v')
            .map_or(false, |digits| digits.parse::<u32>().is_ok());
    if is_token(alias) && !reserved {
        Ok(())
    } else {
        Err(StoreError::InvalidReference {
            reference: alias.to_string(),
            reason: "aliases are plain tokens other than 'latest' and 'vN'".to_string(),
        })
    }
}

/// What the caller wants published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub name: String,
    pub artifact_type: String,
    pub description: String,
    /// Name of the payload file inside the artifact
    pub file_name: String,
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Pending,
    Committed,
}

/// Everything the store knows about one artifact version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub version: u32,
    pub artifact_type: String,
    pub description: String,
    pub file_name: String,
    /// `sha256:<hex>` of the payload
    pub digest: String,
    pub size_bytes: u64,
    pub metadata: serde_json::Value,
    pub aliases: Vec<String>,
    pub state: ArtifactState,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl ArtifactManifest {
    pub fn pending(
        draft: ArtifactDraft,
        version: u32,
        digest: String,
        size_bytes: u64,
        created_by: Uuid,
    ) -> Self {
        Self {
            name: draft.name,
            version,
            artifact_type: draft.artifact_type,
            description: draft.description,
            file_name: draft.file_name,
            digest,
            size_bytes,
            metadata: draft.metadata,
            aliases: draft.aliases,
            state: ArtifactState::Pending,
            created_by: Some(created_by),
            created_at: Utc::now(),
            committed_at: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == ArtifactState::Committed
    }

    pub fn commit(&mut self) {
        self.state = ArtifactState::Committed;
        self.committed_at = Some(Utc::now());
    }

    /// `name:vN`
    pub fn qualified_name(&self) -> String {
        format!("{}:v{}", self.name, self.version)
    }
}

/// A committed artifact materialized as a local file.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub manifest: ArtifactManifest,
    pub path: PathBuf,
}

/// Ticket for a staged, not yet durable, artifact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPublish {
    pub name: String,
    pub version: u32,
    pub submitted_at: DateTime<Utc>,
}

impl PendingPublish {
    pub fn qualified_name(&self) -> String {
        format!("{}:v{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DurabilityOutcome {
    Durable(ArtifactManifest),
    Failed(String),
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed { message: String },
}

/// An open run. Created by [`ArtifactStore::start_run`] and consumed by
/// [`ArtifactStore::finish_run`].
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: Uuid,
    job_type: String,
    config: serde_json::Value,
    started_at: DateTime<Utc>,
    used_artifacts: Vec<String>,
    logged_artifacts: Vec<String>,
}

impl RunHandle {
    pub fn new(job_type: &str, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            config,
            started_at: Utc::now(),
            used_artifacts: Vec::new(),
            logged_artifacts: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn used_artifacts(&self) -> &[String] {
        &self.used_artifacts
    }

    pub fn logged_artifacts(&self) -> &[String] {
        &self.logged_artifacts
    }

    pub fn record_use(&mut self, qualified_name: String) {
        self.used_artifacts.push(qualified_name);
    }

    pub fn record_logged(&mut self, qualified_name: String) {
        self.logged_artifacts.push(qualified_name);
    }

    /// Snapshot of the run as it stands, with the given status.
    pub fn snapshot(&self, status: RunStatus) -> RunRecord {
        RunRecord {
            id: self.id,
            job_type: self.job_type.clone(),
            config: self.config.clone(),
            used_artifacts: self.used_artifacts.clone(),
            logged_artifacts: self.logged_artifacts.clone(),
            status,
            started_at: self.started_at,
            finished_at: None,
        }
    }

    pub fn finish(self, status: RunStatus) -> RunRecord {
        let mut record = self.snapshot(status);
        record.finished_at = Some(Utc::now());
        record
    }
}

/// Persisted provenance of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub job_type: String,
    pub config: serde_json::Value,
    pub used_artifacts: Vec<String>,
    pub logged_artifacts: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(version: u32, state: ArtifactState, aliases: &[&str]) -> ArtifactManifest {
        let draft = ArtifactDraft {
            name: "sample.csv".to_string(),
            artifact_type: "raw_data".to_string(),
            description: "raw".to_string(),
            file_name: "sample.csv".to_string(),
            metadata: json!({}),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        };
        let mut m = ArtifactManifest::pending(draft, version, "sha256:00".into(), 0, Uuid::nil());
        if state == ArtifactState::Committed {
            m.commit();
        }
        m
    }

    #[test]
    fn test_parse_bare_name_means_latest() {
        let r = ArtifactRef::parse("sample.csv").unwrap();
        assert_eq!(r.name, "sample.csv");
        assert_eq!(r.selector, VersionSelector::Latest);
        assert_eq!(r.to_string(), "sample.csv:latest");
    }

    #[test]
    fn test_parse_version_and_alias() {
        assert_eq!(
            ArtifactRef::parse("sample.csv:v3").unwrap().selector,
            VersionSelector::Version(3)
        );
        assert_eq!(
            ArtifactRef::parse("sample.csv:reference").unwrap().selector,
            VersionSelector::Alias("reference".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_bad_references() {
        for bad in ["", ":latest", "sample.csv:", "../etc:latest", "a/b:v1", ".hidden"] {
            assert!(
                matches!(ArtifactRef::parse(bad), Err(StoreError::InvalidReference { .. })),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_reserved_aliases_are_rejected() {
        assert!(validate_alias("reference").is_ok());
        assert!(validate_alias("latest").is_err());
        assert!(validate_alias("v7").is_err());
        assert!(validate_alias("has space").is_err());
    }

    #[test]
    fn test_pick_ignores_pending_versions() {
        let manifests = vec![
            manifest(0, ArtifactState::Committed, &[]),
            manifest(1, ArtifactState::Committed, &["reference"]),
            manifest(2, ArtifactState::Pending, &["reference"]),
        ];
        assert_eq!(VersionSelector::Latest.pick(&manifests).unwrap().version, 1);
        assert_eq!(
            VersionSelector::Alias("reference".into())
                .pick(&manifests)
                .unwrap()
                .version,
            1
        );
        assert!(VersionSelector::Version(2).pick(&manifests).is_none());
        assert_eq!(VersionSelector::Version(0).pick(&manifests).unwrap().version, 0);
    }

    #[test]
    fn test_run_handle_tracks_lineage() {
        let mut run = RunHandle::new("basic_cleaning", json!({"min_price": 10.0}));
        run.record_use("sample.csv:v0".to_string());
        run.record_logged("clean_sample.csv:v0".to_string());
        let record = run.finish(RunStatus::Succeeded);
        assert_eq!(record.used_artifacts, vec!["sample.csv:v0"]);
        assert_eq!(record.logged_artifacts, vec!["clean_sample.csv:v0"]);
        assert_eq!(record.config["min_price"], 10.0);
        assert!(record.finished_at.is_some());
    }
}
