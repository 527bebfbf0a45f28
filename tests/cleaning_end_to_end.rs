use anyhow::Result;
use basic_cleaning::gateway::{
    cas_fs, ArtifactDraft, ArtifactRef, ArtifactStore, DurabilityOutcome, LocalArtifactStore,
    RunStatus,
};
use basic_cleaning::{CleaningStep, Dataset, RunConfig};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

async fn seed(store: &LocalArtifactStore, dir: &Path, name: &str, csv: &str) -> Result<()> {
    let file = dir.join(name);
    fs::write(&file, csv)?;
    let mut run = store.start_run("upload", json!({})).await?;
    let draft = ArtifactDraft {
        name: name.to_string(),
        artifact_type: "raw_data".to_string(),
        description: "Raw listings".to_string(),
        file_name: name.to_string(),
        metadata: json!({}),
        aliases: Vec::new(),
    };
    let pending = store.publish(&mut run, draft, &file).await?;
    match store
        .await_durable(&mut run, pending, Duration::from_secs(5))
        .await
    {
        DurabilityOutcome::Durable(_) => {}
        other => anyhow::bail!("seed publish failed: {:?}", other),
    }
    store.finish_run(run, RunStatus::Succeeded).await?;
    Ok(())
}

fn config(min_price: f64, max_price: f64) -> RunConfig {
    RunConfig {
        input_artifact: "sample.csv:latest".to_string(),
        output_artifact: "clean_sample.csv".to_string(),
        output_type: "clean_sample".to_string(),
        output_description: "Data with outliers and null values removed".to_string(),
        min_price,
        max_price,
    }
}

fn read_output(store: &LocalArtifactStore, reference: &str) -> Result<Dataset> {
    let manifest = store.resolve(&ArtifactRef::parse(reference)?)?;
    let blob = cas_fs::blob_path(&store.root().join("objects"), &manifest.digest)
        .ok_or_else(|| anyhow::anyhow!("bad digest {}", manifest.digest))?;
    Ok(Dataset::from_path(&blob)?)
}

#[tokio::test]
async fn test_publishes_only_in_range_rows_with_normalized_dates() -> Result<()> {
    let temp_dir = tempdir()?;
    let store = LocalArtifactStore::open(temp_dir.path().join("store"))?;
    seed(
        &store,
        temp_dir.path(),
        "sample.csv",
        "price,last_review\n30,2019-05-01\n500,2018-01-01\n",
    )
    .await?;

    let report = CleaningStep::new(Duration::from_secs(5))
        .run(&store, &config(0.0, 100.0))
        .await?;

    assert_eq!(report.output.qualified_name(), "clean_sample.csv:v0");
    let output = read_output(&store, "clean_sample.csv:latest")?;
    assert_eq!(output.headers(), ["price", "last_review"]);
    assert_eq!(output.rows(), [vec!["30".to_string(), "2019-05-01".to_string()]]);
    Ok(())
}

#[tokio::test]
async fn test_run_record_and_artifact_carry_full_configuration() -> Result<()> {
    let temp_dir = tempdir()?;
    let store = LocalArtifactStore::open(temp_dir.path().join("store"))?;
    seed(
        &store,
        temp_dir.path(),
        "sample.csv",
        "id,price,last_review\n1,10,2019-01-01\n2,50,2019/02/03\n3,999,not-a-date\n",
    )
    .await?;

    let cfg = config(20.0, 200.0);
    let report = CleaningStep::new(Duration::from_secs(5))
        .run(&store, &cfg)
        .await?;

    let manifest = store.resolve(&ArtifactRef::parse("clean_sample.csv:v0")?)?;
    for key in [
        "input_artifact",
        "output_artifact",
        "output_type",
        "output_description",
        "min_price",
        "max_price",
    ] {
        assert!(manifest.metadata.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(manifest.metadata["input_artifact"], "sample.csv:latest");
    assert_eq!(manifest.metadata["min_price"], 20.0);
    assert_eq!(manifest.description, cfg.output_description);
    assert_eq!(manifest.created_by, Some(report.run_id));

    let record = store.read_run(report.run_id)?;
    assert_eq!(record.job_type, "basic_cleaning");
    assert_eq!(record.config, cfg.to_provenance());
    assert_eq!(record.used_artifacts, vec!["sample.csv:v0"]);
    assert_eq!(record.logged_artifacts, vec!["clean_sample.csv:v0"]);
    assert_eq!(record.status, RunStatus::Succeeded);

    let output = read_output(&store, "clean_sample.csv")?;
    assert_eq!(
        output.rows(),
        [vec!["2".to_string(), "50".to_string(), "2019-02-03".to_string()]]
    );
    Ok(())
}

#[tokio::test]
async fn test_rerun_creates_a_new_version_and_keeps_the_old_one() -> Result<()> {
    let temp_dir = tempdir()?;
    let store = LocalArtifactStore::open(temp_dir.path().join("store"))?;
    seed(
        &store,
        temp_dir.path(),
        "sample.csv",
        "price,last_review\n15,2019-05-01\n60,2019-06-01\n",
    )
    .await?;

    let step = CleaningStep::new(Duration::from_secs(5));
    step.run(&store, &config(0.0, 100.0)).await?;
    step.run(&store, &config(50.0, 100.0)).await?;

    assert_eq!(read_output(&store, "clean_sample.csv:v0")?.len(), 2);
    assert_eq!(read_output(&store, "clean_sample.csv:v1")?.len(), 1);
    assert_eq!(read_output(&store, "clean_sample.csv:latest")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cleaned_output_can_feed_another_run_unchanged() -> Result<()> {
    let temp_dir = tempdir()?;
    let store = LocalArtifactStore::open(temp_dir.path().join("store"))?;
    seed(
        &store,
        temp_dir.path(),
        "sample.csv",
        "price,last_review\n5,2019-05-01\n40,05/02/2019\n80,\n120,2019-07-01\n",
    )
    .await?;

    let step = CleaningStep::new(Duration::from_secs(5));
    step.run(&store, &config(10.0, 100.0)).await?;

    let mut again = config(10.0, 100.0);
    again.input_artifact = "clean_sample.csv:v0".to_string();
    again.output_artifact = "clean_sample_again.csv".to_string();
    step.run(&store, &again).await?;

    let first = read_output(&store, "clean_sample.csv:v0")?;
    let second = read_output(&store, "clean_sample_again.csv:v0")?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_input_fails_and_marks_run_failed() -> Result<()> {
    let temp_dir = tempdir()?;
    let store = LocalArtifactStore::open(temp_dir.path().join("store"))?;

    let err = CleaningStep::new(Duration::from_secs(5))
        .run(&store, &config(0.0, 100.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sample.csv:latest"));
    assert!(store.versions("clean_sample.csv")?.is_empty());

    let runs: Vec<_> = fs::read_dir(temp_dir.path().join("store").join("runs"))?.collect();
    assert_eq!(runs.len(), 1);
    Ok(())
}
