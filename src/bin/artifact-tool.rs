use anyhow::{anyhow, Context, Result};
use basic_cleaning::gateway::{
    ArtifactDraft, ArtifactManifest, ArtifactRef, ArtifactStore, DurabilityOutcome,
    LocalArtifactStore, RunHandle, RunStatus,
};
use basic_cleaning::{logging, Settings};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "artifact-tool")]
#[command(about = "Inspect and seed the local artifact store")]
struct Cli {
    /// Settings file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the artifact store
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a local file as a new artifact version
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        artifact_type: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Extra alias to attach, besides the implicit `latest`
        #[arg(long)]
        alias: Vec<String>,
        /// Payload to upload
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the manifest a reference resolves to
    Show { reference: String },
    /// Print a run record
    Runs { id: Uuid },
}

/// Close `run` as failed and turn `message` into the command's error.
async fn fail_run(store: &LocalArtifactStore, run: RunHandle, message: String) -> anyhow::Error {
    if let Err(e) = store
        .finish_run(run, RunStatus::Failed { message: message.clone() })
        .await
    {
        warn!("Could not record failed upload run: {}", e);
    }
    anyhow!(message)
}

async fn add(
    store: &LocalArtifactStore,
    settings: &Settings,
    draft: ArtifactDraft,
    file: &Path,
) -> Result<ArtifactManifest> {
    let mut run = store
        .start_run("upload", serde_json::json!({ "file": file.display().to_string() }))
        .await?;
    let pending = match store.publish(&mut run, draft, file).await {
        Ok(pending) => pending,
        Err(e) => return Err(fail_run(store, run, format!("publish rejected: {}", e)).await),
    };
    let outcome = store
        .await_durable(&mut run, pending, settings.publish_timeout())
        .await;
    let manifest = match outcome {
        DurabilityOutcome::Durable(manifest) => manifest,
        DurabilityOutcome::Failed(reason) => {
            return Err(fail_run(store, run, format!("publish failed: {}", reason)).await)
        }
        DurabilityOutcome::TimedOut(waited) => {
            return Err(fail_run(store, run, format!("not durable after {:?}", waited)).await)
        }
    };
    store.finish_run(run, RunStatus::Succeeded).await?;
    info!("Published {}", manifest.qualified_name());
    Ok(manifest)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let mut settings = Settings::load(cli.config.as_deref())?.with_env_overrides()?;
    if let Some(root) = cli.store_root {
        settings.store.root = root;
    }
    let _log_guard = logging::init_logging(&settings.logging.dir);

    let store = LocalArtifactStore::open(&settings.store.root)
        .with_context(|| format!("opening artifact store at {}", settings.store.root.display()))?;

    match cli.command {
        Commands::Add {
            name,
            artifact_type,
            description,
            alias,
            file,
        } => {
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            let draft = ArtifactDraft {
                name,
                artifact_type,
                description,
                file_name,
                metadata: serde_json::Value::Null,
                aliases: alias,
            };
            let manifest = add(&store, &settings, draft, &file).await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Commands::Show { reference } => {
            let reference = ArtifactRef::parse(&reference)?;
            let manifest = store.resolve(&reference)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Commands::Runs { id } => {
            let record = store.read_run(id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;

    fn draft(name: &str) -> ArtifactDraft {
        ArtifactDraft {
            name: name.to_string(),
            artifact_type: "raw_data".to_string(),
            description: "Raw listings".to_string(),
            file_name: "sample.csv".to_string(),
            metadata: serde_json::Value::Null,
            aliases: Vec::new(),
        }
    }

    fn only_run(store: &LocalArtifactStore) -> basic_cleaning::gateway::RunRecord {
        let mut entries: Vec<_> = fs::read_dir(store.root().join("runs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let id = entries.remove(0);
        let id = id.file_stem().unwrap().to_str().unwrap();
        store.read_run(Uuid::parse_str(id).unwrap()).unwrap()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_add_and_runs_subcommands() {
        let cli = Cli::try_parse_from([
            "artifact-tool",
            "add",
            "--name",
            "sample.csv",
            "--type",
            "raw_data",
            "--file",
            "data/sample.csv",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Add { ref file, .. } if file == Path::new("data/sample.csv")
        ));

        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["artifact-tool", "runs", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { id: parsed } if parsed == id));
    }

    #[tokio::test]
    async fn test_add_publishes_and_closes_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path().join("store")).unwrap();
        let file = dir.path().join("sample.csv");
        fs::write(&file, "price,last_review\n30,2019-05-01\n").unwrap();

        let manifest = add(&store, &Settings::default(), draft("sample.csv"), &file)
            .await
            .unwrap();
        assert_eq!(manifest.qualified_name(), "sample.csv:v0");

        let record = only_run(&store);
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(record.logged_artifacts, vec!["sample.csv:v0"]);
    }

    #[tokio::test]
    async fn test_rejected_upload_marks_run_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path().join("store")).unwrap();
        let file = dir.path().join("sample.csv");
        fs::write(&file, "price\n30\n").unwrap();

        let err = add(&store, &Settings::default(), draft("../escape"), &file)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("publish rejected"));

        let record = only_run(&store);
        assert!(matches!(record.status, RunStatus::Failed { .. }));
        assert!(record.logged_artifacts.is_empty());
        assert!(record.finished_at.is_some());
    }
}
