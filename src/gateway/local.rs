use super::{
    cas_fs, validate_alias, validate_name, ArtifactDraft, ArtifactManifest, ArtifactRef,
    ArtifactStore, DurabilityOutcome, FetchedArtifact, PendingPublish, RunHandle, RunRecord,
    RunStatus, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Filesystem artifact store.
///
/// Layout under `root`:
///
/// ```text
/// objects/sha256/ab/cd/<hex>       payload blobs
/// artifacts/<name>/v<N>.json       one manifest per version
/// runs/<run-id>.json               run records
/// ```
///
/// A version is reserved by creating its manifest exclusively, so concurrent
/// publishers of the same name never share a version number.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { root: root.into() };
        fs::create_dir_all(store.objects_dir())?;
        fs::create_dir_all(store.root.join("artifacts"))?;
        fs::create_dir_all(store.runs_dir())?;
        debug!("Opened artifact store at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root.join("artifacts").join(name)
    }

    fn manifest_path(&self, name: &str, version: u32) -> PathBuf {
        self.artifact_dir(name).join(format!("v{}.json", version))
    }

    /// All manifests of `name`, pending ones included, ordered by version.
    pub fn versions(&self, name: &str) -> Result<Vec<ArtifactManifest>, StoreError> {
        let dir = self.artifact_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e, name)),
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<ArtifactManifest>(&content) {
                Ok(manifest) => manifests.push(manifest),
                // Reserved but not yet written
                Err(_) if content.is_empty() => continue,
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        artifact: path.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        manifests.sort_by_key(|m| m.version);
        Ok(manifests)
    }

    /// Resolve a reference to a committed manifest.
    pub fn resolve(&self, reference: &ArtifactRef) -> Result<ArtifactManifest, StoreError> {
        let manifests = self.versions(&reference.name)?;
        reference
            .selector
            .pick(&manifests)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))
    }

    pub fn read_run(&self, id: Uuid) -> Result<RunRecord, StoreError> {
        let path = self.runs_dir().join(format!("{}.json", id));
        let content = fs::read_to_string(&path).map_err(|e| map_io(e, &id.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let path = self.runs_dir().join(format!("{}.json", record.id));
        write_json_atomic(&path, record)
    }

    /// Claim the next free version number of `name` by creating its manifest
    /// file exclusively.
    fn reserve_version(&self, name: &str) -> Result<u32, StoreError> {
        fs::create_dir_all(self.artifact_dir(name))?;
        let mut version = self
            .versions(name)?
            .last()
            .map(|m| m.version + 1)
            .unwrap_or(0);
        loop {
            let path = self.manifest_path(name, version);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(version),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => version += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Verify the staged blob and rewrite the manifest as committed. Nothing is
    /// committed once `deadline` has passed, so a wait that timed out never
    /// turns into a visible version afterwards.
    fn commit(
        &self,
        pending: &PendingPublish,
        deadline: Option<Instant>,
    ) -> Result<ArtifactManifest, StoreError> {
        let path = self.manifest_path(&pending.name, pending.version);
        let content = fs::read_to_string(&path).map_err(|e| map_io(e, &pending.qualified_name()))?;
        let mut manifest: ArtifactManifest = serde_json::from_str(&content)?;
        if manifest.is_committed() {
            return Ok(manifest);
        }

        if !cas_fs::verify_blob(&self.objects_dir(), &manifest.digest)? {
            return Err(StoreError::Corrupt {
                artifact: pending.qualified_name(),
                reason: format!("payload no longer matches {}", manifest.digest),
            });
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::Rejected(format!(
                "{} verified after its deadline",
                pending.qualified_name()
            )));
        }
        manifest.commit();
        write_json_atomic(&path, &manifest)?;
        Ok(manifest)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn start_run(
        &self,
        job_type: &str,
        config: serde_json::Value,
    ) -> Result<RunHandle, StoreError> {
        let run = RunHandle::new(job_type, config);
        self.write_run(&run.snapshot(RunStatus::Running))?;
        info!(run_id = %run.id(), "Started {} run", job_type);
        Ok(run)
    }

    async fn fetch(
        &self,
        run: &mut RunHandle,
        reference: &ArtifactRef,
    ) -> Result<FetchedArtifact, StoreError> {
        let manifest = self.resolve(reference)?;
        let path = cas_fs::blob_path(&self.objects_dir(), &manifest.digest).ok_or_else(|| {
            StoreError::Corrupt {
                artifact: manifest.qualified_name(),
                reason: format!("unusable digest '{}'", manifest.digest),
            }
        })?;

        // Surface missing or unreadable payloads now rather than at parse time
        File::open(&path).map_err(|e| map_io(e, &manifest.qualified_name()))?;

        debug!("Resolved {} to {}", reference, manifest.qualified_name());
        run.record_use(manifest.qualified_name());
        Ok(FetchedArtifact { manifest, path })
    }

    async fn publish(
        &self,
        run: &mut RunHandle,
        draft: ArtifactDraft,
        payload: &Path,
    ) -> Result<PendingPublish, StoreError> {
        validate_name(&draft.name)?;
        for alias in &draft.aliases {
            validate_alias(alias)?;
        }
        let bytes = fs::read(payload).map_err(|e| map_io(e, &payload.display().to_string()))?;
        let digest = cas_fs::write_blob(&self.objects_dir(), &bytes)?;

        let name = draft.name.clone();
        let version = self.reserve_version(&name)?;
        let manifest =
            ArtifactManifest::pending(draft, version, digest, bytes.len() as u64, run.id());
        write_json_atomic(&self.manifest_path(&name, version), &manifest)?;

        debug!("Staged {} ({} bytes)", manifest.qualified_name(), bytes.len());
        Ok(PendingPublish {
            name,
            version,
            submitted_at: Utc::now(),
        })
    }

    async fn await_durable(
        &self,
        run: &mut RunHandle,
        pending: PendingPublish,
        timeout: Duration,
    ) -> DurabilityOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let store = self.clone();
        let staged = pending.clone();
        // Hashing and fsync block, so they run off the runtime where the deadline can fire
        let commit = tokio::task::spawn_blocking(move || store.commit(&staged, deadline));

        match tokio::time::timeout(timeout, commit).await {
            Ok(Ok(Ok(manifest))) => {
                run.record_logged(manifest.qualified_name());
                DurabilityOutcome::Durable(manifest)
            }
            Ok(Ok(Err(e))) => {
                warn!("Could not commit {}: {}", pending.qualified_name(), e);
                DurabilityOutcome::Failed(e.to_string())
            }
            Ok(Err(e)) => DurabilityOutcome::Failed(format!("commit task failed: {}", e)),
            Err(_) => {
                warn!(
                    "{} not durable after {:?}",
                    pending.qualified_name(),
                    timeout
                );
                DurabilityOutcome::TimedOut(timeout)
            }
        }
    }

    async fn finish_run(&self, run: RunHandle, status: RunStatus) -> Result<RunRecord, StoreError> {
        let record = run.finish(status);
        self.write_run(&record)?;
        Ok(record)
    }
}

fn map_io(e: io::Error, what: &str) -> StoreError {
    match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(what.to_string()),
        io::ErrorKind::PermissionDenied => StoreError::PermissionDenied(what.to_string()),
        _ => StoreError::Io(e),
    }
}

/// Write pretty JSON next to `path` and rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Rejected(format!("no parent for {}", path.display())))?;
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut staged, value)?;
    staged.write_all(b"\n")?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
