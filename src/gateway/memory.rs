use super::{
    cas_fs, validate_alias, validate_name, ArtifactDraft, ArtifactManifest, ArtifactRef,
    ArtifactStore, DurabilityOutcome, FetchedArtifact, PendingPublish, RunHandle, RunRecord,
    RunStatus, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// How the in-memory store answers publish requests.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishBehavior {
    /// Accept and confirm immediately
    Confirm,
    /// Refuse at publish time
    Reject(String),
    /// Accept, then report a durability failure
    FailDurability(String),
    /// Accept and never confirm, so every wait times out
    NeverConfirm,
}

struct StoredArtifact {
    manifest: ArtifactManifest,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    artifacts: HashMap<String, Vec<StoredArtifact>>,
    runs: HashMap<Uuid, RunRecord>,
}

/// In-memory artifact store for tests and dry runs. Fetched payloads are
/// materialized into a private temporary directory that lives as long as the
/// store.
pub struct MemoryArtifactStore {
    state: Mutex<State>,
    behavior: Mutex<PublishBehavior>,
    scratch: tempfile::TempDir,
}

impl MemoryArtifactStore {
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            state: Mutex::new(State::default()),
            behavior: Mutex::new(PublishBehavior::Confirm),
            scratch: tempfile::tempdir()?,
        })
    }

    pub fn set_behavior(&self, behavior: PublishBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    fn behavior(&self) -> PublishBehavior {
        self.behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a committed version directly, as an upstream step would have.
    pub fn seed(
        &self,
        name: &str,
        artifact_type: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<ArtifactManifest, StoreError> {
        validate_name(name)?;
        let bytes = bytes.into();
        let draft = ArtifactDraft {
            name: name.to_string(),
            artifact_type: artifact_type.to_string(),
            description: format!("seeded {}", name),
            file_name: name.to_string(),
            metadata: serde_json::Value::Null,
            aliases: Vec::new(),
        };
        let mut state = self.state();
        let versions = state.artifacts.entry(name.to_string()).or_default();
        let mut manifest = ArtifactManifest::pending(
            draft,
            versions.len() as u32,
            cas_fs::digest(&bytes),
            bytes.len() as u64,
            Uuid::nil(),
        );
        manifest.created_by = None;
        manifest.commit();
        versions.push(StoredArtifact {
            manifest: manifest.clone(),
            bytes,
        });
        Ok(manifest)
    }

    /// Every version of `name`, pending ones included.
    pub fn versions(&self, name: &str) -> Vec<ArtifactManifest> {
        self.state()
            .artifacts
            .get(name)
            .map(|v| v.iter().map(|s| s.manifest.clone()).collect())
            .unwrap_or_default()
    }

    /// Payload of the committed version `reference` resolves to.
    pub fn payload(&self, reference: &str) -> Option<Vec<u8>> {
        let reference = ArtifactRef::parse(reference).ok()?;
        let state = self.state();
        let stored = state.artifacts.get(&reference.name)?;
        let manifest = reference.selector.pick(stored.iter().map(|s| &s.manifest))?;
        stored
            .iter()
            .find(|s| s.manifest.version == manifest.version)
            .map(|s| s.bytes.clone())
    }

    pub fn run(&self, id: Uuid) -> Option<RunRecord> {
        self.state().runs.get(&id).cloned()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.state().runs.values().cloned().collect()
    }

    fn mark_committed(&self, pending: &PendingPublish) -> Result<ArtifactManifest, StoreError> {
        let mut state = self.state();
        let stored = state
            .artifacts
            .get_mut(&pending.name)
            .and_then(|v| v.iter_mut().find(|s| s.manifest.version == pending.version))
            .ok_or_else(|| StoreError::NotFound(pending.qualified_name()))?;
        if !stored.manifest.is_committed() {
            stored.manifest.commit();
        }
        Ok(stored.manifest.clone())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn start_run(
        &self,
        job_type: &str,
        config: serde_json::Value,
    ) -> Result<RunHandle, StoreError> {
        let run = RunHandle::new(job_type, config);
        self.state()
            .runs
            .insert(run.id(), run.snapshot(RunStatus::Running));
        Ok(run)
    }

    async fn fetch(
        &self,
        run: &mut RunHandle,
        reference: &ArtifactRef,
    ) -> Result<FetchedArtifact, StoreError> {
        let (manifest, bytes) = {
            let state = self.state();
            let stored = state
                .artifacts
                .get(&reference.name)
                .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
            let manifest = reference
                .selector
                .pick(stored.iter().map(|s| &s.manifest))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
            let bytes = stored
                .iter()
                .find(|s| s.manifest.version == manifest.version)
                .map(|s| s.bytes.clone())
                .unwrap_or_default();
            (manifest, bytes)
        };

        let path = self
            .scratch
            .path()
            .join(format!("{}-v{}", manifest.name, manifest.version));
        fs::write(&path, &bytes)?;

        run.record_use(manifest.qualified_name());
        Ok(FetchedArtifact { manifest, path })
    }

    async fn publish(
        &self,
        run: &mut RunHandle,
        draft: ArtifactDraft,
        payload: &Path,
    ) -> Result<PendingPublish, StoreError> {
        if let PublishBehavior::Reject(reason) = self.behavior() {
            return Err(StoreError::Rejected(reason));
        }
        validate_name(&draft.name)?;
        for alias in &draft.aliases {
            validate_alias(alias)?;
        }
        let bytes = fs::read(payload)?;

        let name = draft.name.clone();
        let manifest = {
            let mut state = self.state();
            let versions = state.artifacts.entry(name.clone()).or_default();
            let manifest = ArtifactManifest::pending(
                draft,
                versions.len() as u32,
                cas_fs::digest(&bytes),
                bytes.len() as u64,
                run.id(),
            );
            versions.push(StoredArtifact {
                manifest: manifest.clone(),
                bytes,
            });
            manifest
        };

        debug!("Staged {} in memory", manifest.qualified_name());
        Ok(PendingPublish {
            name,
            version: manifest.version,
            submitted_at: Utc::now(),
        })
    }

    async fn await_durable(
        &self,
        run: &mut RunHandle,
        pending: PendingPublish,
        timeout: Duration,
    ) -> DurabilityOutcome {
        match self.behavior() {
            PublishBehavior::NeverConfirm => {
                tokio::time::sleep(timeout).await;
                DurabilityOutcome::TimedOut(timeout)
            }
            PublishBehavior::FailDurability(reason) => DurabilityOutcome::Failed(reason),
            PublishBehavior::Confirm | PublishBehavior::Reject(_) => {
                match self.mark_committed(&pending) {
                    Ok(manifest) => {
                        run.record_logged(manifest.qualified_name());
                        DurabilityOutcome::Durable(manifest)
                    }
                    Err(e) => DurabilityOutcome::Failed(e.to_string()),
                }
            }
        }
    }

    async fn finish_run(&self, run: RunHandle, status: RunStatus) -> Result<RunRecord, StoreError> {
        let record = run.finish(status);
        self.state().runs.insert(record.id, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_seeded_artifact_can_be_fetched() {
        let store = MemoryArtifactStore::new().unwrap();
        store.seed("sample.csv", "raw_data", "price\n10\n").unwrap();
        let mut run = store.start_run("basic_cleaning", json!({})).await.unwrap();

        let fetched = store
            .fetch(&mut run, &ArtifactRef::parse("sample.csv:latest").unwrap())
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&fetched.path).unwrap(), "price\n10\n");
        assert_eq!(run.used_artifacts(), ["sample.csv:v0"]);
    }

    #[tokio::test]
    async fn test_never_confirm_times_out() {
        let store = MemoryArtifactStore::new().unwrap();
        store.set_behavior(PublishBehavior::NeverConfirm);
        let mut run = store.start_run("basic_cleaning", json!({})).await.unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "price\n").unwrap();

        let draft = ArtifactDraft {
            name: "clean_sample.csv".to_string(),
            artifact_type: "clean_sample".to_string(),
            description: "cleaned".to_string(),
            file_name: "clean_sample.csv".to_string(),
            metadata: json!({}),
            aliases: Vec::new(),
        };
        let pending = store.publish(&mut run, draft, file.path()).await.unwrap();
        let outcome = store
            .await_durable(&mut run, pending, Duration::from_millis(10))
            .await;
        assert_eq!(outcome, DurabilityOutcome::TimedOut(Duration::from_millis(10)));
        assert!(store.payload("clean_sample.csv").is_none());
        assert!(run.logged_artifacts().is_empty());
    }
}
