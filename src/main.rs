use anyhow::Context;
use basic_cleaning::gateway::LocalArtifactStore;
use basic_cleaning::{logging, CleaningStep, RunConfig, Settings};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "basic-cleaning")]
#[command(about = "A very basic data cleaning")]
#[command(version)]
struct Cli {
    /// Name for the input artifact
    #[arg(long = "input_artifact", value_parser = NonEmptyStringValueParser::new())]
    input_artifact: String,

    /// Name for the output artifact
    #[arg(long = "output_artifact", value_parser = NonEmptyStringValueParser::new())]
    output_artifact: String,

    /// Type for the output artifact
    #[arg(long = "output_type", value_parser = NonEmptyStringValueParser::new())]
    output_type: String,

    /// Description for the output artifact
    #[arg(long = "output_description", value_parser = NonEmptyStringValueParser::new())]
    output_description: String,

    /// Min price
    #[arg(long = "min_price", allow_negative_numbers = true)]
    min_price: f64,

    /// Max price
    #[arg(long = "max_price", allow_negative_numbers = true)]
    max_price: f64,

    /// Settings file (defaults to ./config.toml when present)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Root directory of the artifact store
    #[arg(long = "store_root")]
    store_root: Option<PathBuf>,

    /// Seconds to wait for the output artifact to become durable
    #[arg(long = "publish_timeout_secs")]
    publish_timeout_secs: Option<u64>,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            input_artifact: self.input_artifact.clone(),
            output_artifact: self.output_artifact.clone(),
            output_type: self.output_type.clone(),
            output_description: self.output_description.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }

    /// File, then environment, then command line.
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?.with_env_overrides()?;
        if let Some(root) = &self.store_root {
            settings.store.root = root.clone();
        }
        if let Some(secs) = self.publish_timeout_secs {
            settings.publish.timeout_secs = secs;
        }
        Ok(settings)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Usage errors exit here, before any I/O
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let settings = cli.settings().context("loading settings")?;
    let _log_guard = logging::init_logging(&settings.logging.dir);

    let config = cli.run_config();
    let store = LocalArtifactStore::open(&settings.store.root).with_context(|| {
        format!(
            "opening artifact store at {}",
            settings.store.root.display()
        )
    })?;
    let step = CleaningStep::new(settings.publish_timeout())
        .with_work_dir(settings.store.work_dir.clone());

    match step.run(&store, &config).await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                "Published {} from {}: kept {} of {} rows",
                report.output.qualified_name(),
                report.input,
                report.filter.rows_kept,
                report.filter.rows_in
            );
            Ok(())
        }
        Err(e) => {
            error!("Basic cleaning failed: {}", e);
            Err(e).context("basic cleaning failed")
        }
    }
}
