pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod pipeline;

pub use config::{RunConfig, Settings};
pub use dataset::Dataset;
pub use error::{CleaningError, Result};
pub use pipeline::{CleaningStep, StepReport};
