/// Column and naming constants shared by the cleaning step and the artifact store

// Columns the cleaning step depends on
pub const PRICE_COLUMN: &str = "price";
pub const LAST_REVIEW_COLUMN: &str = "last_review";

/// Job type recorded on every run opened by the cleaning step
pub const JOB_TYPE: &str = "basic_cleaning";

/// File name the cleaned payload carries inside the output artifact
pub const CLEAN_FILE_NAME: &str = "clean_sample.csv";

/// Canonical on-disk representation of a normalized review date
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Artifact reference aliases
pub const LATEST_ALIAS: &str = "latest";

// Settings defaults
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_STORE_ROOT: &str = "artifacts";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 300;

// Environment overrides
pub const ENV_STORE_ROOT: &str = "BASIC_CLEANING_STORE_ROOT";
pub const ENV_WORK_DIR: &str = "BASIC_CLEANING_WORK_DIR";
pub const ENV_LOG_DIR: &str = "BASIC_CLEANING_LOG_DIR";
pub const ENV_PUBLISH_TIMEOUT_SECS: &str = "BASIC_CLEANING_PUBLISH_TIMEOUT_SECS";
