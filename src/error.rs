use crate::gateway::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleaningError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not resolve input artifact '{reference}': {source}")]
    Resolution {
        reference: String,
        #[source]
        source: StoreError,
    },

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Malformed dataset: {0}")]
    Parse(String),

    #[error("Artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publishing '{artifact}' failed: {source}")]
    Publish {
        artifact: String,
        #[source]
        source: StoreError,
    },

    #[error("Store could not confirm '{artifact}' as durable: {reason}")]
    PublishFailed { artifact: String, reason: String },

    #[error("Timed out after {waited:?} waiting for '{artifact}' to become durable")]
    PublishTimedOut { artifact: String, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CleaningError>;
