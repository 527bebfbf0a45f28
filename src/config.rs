use crate::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_LOG_DIR, DEFAULT_PUBLISH_TIMEOUT_SECS, DEFAULT_STORE_ROOT,
    ENV_LOG_DIR, ENV_PUBLISH_TIMEOUT_SECS, ENV_STORE_ROOT, ENV_WORK_DIR,
};
use crate::error::{CleaningError, Result};
use crate::pipeline::PriceRange;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters of one cleaning run, recorded verbatim as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub input_artifact: String,
    pub output_artifact: String,
    pub output_type: String,
    pub output_description: String,
    pub min_price: f64,
    pub max_price: f64,
}

impl RunConfig {
    /// Reject configurations that cannot drive a run. An inverted price range
    /// is allowed and simply selects nothing.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("input_artifact", &self.input_artifact),
            ("output_artifact", &self.output_artifact),
            ("output_type", &self.output_type),
            ("output_description", &self.output_description),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CleaningError::Config(format!("'{}' must not be empty", name)));
            }
        }
        if self.min_price.is_nan() || self.max_price.is_nan() {
            return Err(CleaningError::Config(
                "'min_price' and 'max_price' must be numbers".to_string(),
            ));
        }
        Ok(())
    }

    pub fn price_range(&self) -> PriceRange {
        PriceRange::new(self.min_price, self.max_price)
    }

    /// Run configuration as attached to the run record and the output artifact.
    pub fn to_provenance(&self) -> serde_json::Value {
        json!({
            "input_artifact": self.input_artifact,
            "output_artifact": self.output_artifact,
            "output_type": self.output_type,
            "output_description": self.output_description,
            "min_price": self.min_price,
            "max_price": self.max_price,
        })
    }
}

/// Process settings: where the store lives, where logs and scratch files go,
/// and how long to wait for publish confirmation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub publish: PublishSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub root: PathBuf,
    /// Directory for the intermediate CSV; the system temp dir when unset
    pub work_dir: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STORE_ROOT),
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub timeout_secs: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_PUBLISH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `config.toml` when no path is given.
    /// An explicit path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if !explicit && !config_path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            CleaningError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply `BASIC_CLEANING_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_STORE_ROOT) {
            self.store.root = PathBuf::from(root);
        }
        if let Some(work_dir) = lookup(ENV_WORK_DIR) {
            self.store.work_dir = Some(PathBuf::from(work_dir));
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.logging.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_PUBLISH_TIMEOUT_SECS) {
            self.publish.timeout_secs = raw.trim().parse().map_err(|_| {
                CleaningError::Config(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_PUBLISH_TIMEOUT_SECS, raw
                ))
            })?;
        }
        Ok(self)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_config() -> RunConfig {
        RunConfig {
            input_artifact: "sample.csv:latest".to_string(),
            output_artifact: "clean_sample.csv".to_string(),
            output_type: "clean_sample".to_string(),
            output_description: "Data with outliers and null values removed".to_string(),
            min_price: 10.0,
            max_price: 350.0,
        }
    }

    #[test]
    fn test_validate_accepts_inverted_range() {
        let mut config = sample_config();
        config.min_price = 500.0;
        config.max_price = 10.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut config = sample_config();
        config.output_type = "   ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CleaningError::Config(ref msg) if msg.contains("output_type")));
    }

    #[test]
    fn test_validate_rejects_nan_bounds() {
        let mut config = sample_config();
        config.max_price = f64::NAN;
        assert!(matches!(config.validate(), Err(CleaningError::Config(_))));
    }

    #[test]
    fn test_provenance_carries_all_parameters() {
        let provenance = sample_config().to_provenance();
        let object = provenance.as_object().unwrap();
        assert_eq!(object.len(), 6);
        assert_eq!(object["input_artifact"], "sample.csv:latest");
        assert_eq!(object["output_artifact"], "clean_sample.csv");
        assert_eq!(object["output_type"], "clean_sample");
        assert_eq!(
            object["output_description"],
            "Data with outliers and null values removed"
        );
        assert_eq!(object["min_price"], 10.0);
        assert_eq!(object["max_price"], 350.0);
    }

    #[test]
    fn test_settings_defaults_when_sections_missing() {
        let settings = Settings::from_toml_str("[publish]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(settings.publish_timeout(), Duration::from_secs(5));
        assert_eq!(settings.store.root, PathBuf::from(DEFAULT_STORE_ROOT));
        assert_eq!(settings.logging.dir, PathBuf::from(DEFAULT_LOG_DIR));
        assert!(settings.store.work_dir.is_none());
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_STORE_ROOT, "/srv/artifacts"),
            (ENV_WORK_DIR, "/scratch"),
            (ENV_PUBLISH_TIMEOUT_SECS, "42"),
        ]);
        let settings = Settings::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.store.root, PathBuf::from("/srv/artifacts"));
        assert_eq!(settings.store.work_dir, Some(PathBuf::from("/scratch")));
        assert_eq!(settings.publish.timeout_secs, 42);
    }

    #[test]
    fn test_bad_timeout_override_is_config_error() {
        let result = Settings::default().with_overrides(|key| {
            (key == ENV_PUBLISH_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CleaningError::Config(_))));
    }

    #[test]
    fn test_explicit_missing_config_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Settings::load(Some(&missing)),
            Err(CleaningError::Config(_))
        ));
    }
}
