use crate::config::RunConfig;
use crate::constants::{CLEAN_FILE_NAME, JOB_TYPE, LAST_REVIEW_COLUMN, PRICE_COLUMN};
use crate::dataset::Dataset;
use crate::error::{CleaningError, Result};
use crate::gateway::{
    ArtifactDraft, ArtifactManifest, ArtifactRef, ArtifactStore, DurabilityOutcome, RunHandle,
    RunStatus,
};
use crate::metrics::CleaningMetrics;
use crate::pipeline::filter::{filter_by_price, FilterStats, PriceRange};
use crate::pipeline::normalize::{normalize_dates, NormalizeStats};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Summary of a successful cleaning run
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub run_id: Uuid,
    pub input: String,
    pub output: ArtifactManifest,
    pub filter: FilterStats,
    pub review_dates: NormalizeStats,
}

/// Filter a raw listings dataset to a price range, normalize its review dates
/// and publish the result as a new artifact version.
#[derive(Debug, Clone)]
pub struct CleaningStep {
    publish_timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl CleaningStep {
    pub fn new(publish_timeout: Duration) -> Self {
        Self {
            publish_timeout,
            work_dir: None,
        }
    }

    /// Put the intermediate CSV in `dir` instead of the system temp dir.
    pub fn with_work_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.work_dir = dir;
        self
    }

    /// The in-memory part of the step: price filter, then date normalization.
    pub fn clean(
        dataset: Dataset,
        range: PriceRange,
    ) -> Result<(Dataset, FilterStats, NormalizeStats)> {
        let price_column = dataset.column_index(PRICE_COLUMN)?;
        let review_column = dataset.column_index(LAST_REVIEW_COLUMN)?;

        let (mut cleaned, filter) = filter_by_price(dataset, price_column, range)?;
        let review_dates = normalize_dates(&mut cleaned, review_column);
        Ok((cleaned, filter, review_dates))
    }

    /// Open a run, execute the step inside it and close the run with the
    /// outcome. Configuration is validated before anything touches the store.
    pub async fn run(&self, store: &dyn ArtifactStore, config: &RunConfig) -> Result<StepReport> {
        config.validate()?;

        let mut run = store.start_run(JOB_TYPE, config.to_provenance()).await?;
        let result = self.execute(store, &mut run, config).await;

        let status = match &result {
            Ok(_) => RunStatus::Succeeded,
            Err(e) => RunStatus::Failed {
                message: e.to_string(),
            },
        };
        CleaningMetrics::record_run(if result.is_ok() { "success" } else { "failure" });

        match store.finish_run(run, status).await {
            Ok(record) => info!(run_id = %record.id, status = ?record.status, "Run finished"),
            // The step's own error, if any, matters more than a bookkeeping failure
            Err(e) if result.is_err() => warn!("Could not record failed run: {}", e),
            Err(e) => return Err(e.into()),
        }
        result
    }

    /// Fetch, clean, persist, publish and wait for durability, in that order.
    #[instrument(
        skip(self, store, run, config),
        fields(
            run_id = %run.id(),
            input = %config.input_artifact,
            output = %config.output_artifact
        )
    )]
    pub async fn execute(
        &self,
        store: &dyn ArtifactStore,
        run: &mut RunHandle,
        config: &RunConfig,
    ) -> Result<StepReport> {
        let resolution_error = |source| CleaningError::Resolution {
            reference: config.input_artifact.clone(),
            source,
        };

        info!("Downloading the input artifact");
        let reference = ArtifactRef::parse(&config.input_artifact).map_err(resolution_error)?;
        let fetched = store
            .fetch(run, &reference)
            .await
            .map_err(resolution_error)?;
        let dataset = Dataset::from_path(&fetched.path)?;
        info!(
            "Loaded {} rows from {}",
            dataset.len(),
            fetched.manifest.qualified_name()
        );

        info!("Cleaning data");
        let range = config.price_range();
        if range.is_empty() {
            warn!(
                "min_price {} is above max_price {}; no rows can be kept",
                range.min, range.max
            );
        }
        let (cleaned, filter, review_dates) = Self::clean(dataset, range)?;
        info!(
            "Kept {} of {} rows ({} without a usable price)",
            filter.rows_kept, filter.rows_in, filter.unpriced
        );
        if review_dates.unparsed > 0 {
            warn!(
                "{} last_review values were not dates and were cleared",
                review_dates.unparsed
            );
        }
        CleaningMetrics::record_rows_read(filter.rows_in);
        CleaningMetrics::record_rows_kept(filter.rows_kept);
        CleaningMetrics::record_rows_dropped(filter.rows_dropped());
        CleaningMetrics::record_unparsed_dates(review_dates.unparsed);

        info!("Saving the clean data");
        // Removed when dropped, on success and on every error path
        let scratch = self.write_scratch(&cleaned)?;

        info!("Creating artifact");
        let draft = ArtifactDraft {
            name: config.output_artifact.clone(),
            artifact_type: config.output_type.clone(),
            description: config.output_description.clone(),
            file_name: CLEAN_FILE_NAME.to_string(),
            metadata: config.to_provenance(),
            aliases: Vec::new(),
        };

        info!("Logging artifact");
        let publish_error = |source| CleaningError::Publish {
            artifact: config.output_artifact.clone(),
            source,
        };
        let started = Instant::now();
        let pending = store
            .publish(run, draft, scratch.path())
            .await
            .map_err(publish_error)?;

        let outcome = store
            .await_durable(run, pending, self.publish_timeout)
            .await;
        CleaningMetrics::record_publish_duration(started.elapsed().as_secs_f64());
        let output = match outcome {
            DurabilityOutcome::Durable(manifest) => manifest,
            DurabilityOutcome::Failed(reason) => {
                return Err(CleaningError::PublishFailed {
                    artifact: config.output_artifact.clone(),
                    reason,
                })
            }
            DurabilityOutcome::TimedOut(waited) => {
                return Err(CleaningError::PublishTimedOut {
                    artifact: config.output_artifact.clone(),
                    waited,
                })
            }
        };
        info!("Published {} ({} rows)", output.qualified_name(), cleaned.len());

        Ok(StepReport {
            run_id: run.id(),
            input: fetched.manifest.qualified_name(),
            output,
            filter,
            review_dates,
        })
    }

    fn write_scratch(&self, dataset: &Dataset) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("clean_sample-").suffix(".csv");
        let mut scratch = match &self.work_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        dataset.write_to(scratch.as_file_mut())?;
        scratch.as_file().sync_all()?;
        Ok(scratch)
    }
}
