// ⚙️ Configuration - TOML file, then SWEEP_* environment overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SweepError};
use crate::fetcher::FetchOptions;
use crate::mutator::MutatorOptions;

const ENV_PREFIX: &str = "SWEEP_";
const MAX_PAGE_SIZE_SETTING: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub database_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub reports_dir: PathBuf,

    // Export
    pub page_size: usize,
    pub checkpoint_interval: u64,
    /// Seconds between listing calls.
    pub request_delay: f64,
    /// Seconds to wait before retrying a failed page.
    pub retry_pause: f64,

    // Removal
    pub delete_batch_size: usize,
    /// Seconds between removal calls.
    pub delete_delay: f64,
    pub delete_checkpoint_interval: u64,
    pub delete_confirmation: bool,
    /// Seconds to pause after each removal batch.
    pub batch_pause: f64,

    pub checkpoint_keep: usize,
    pub min_export_confidence: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            database_path: PathBuf::from("channel_sweep.db"),
            checkpoints_dir: PathBuf::from("checkpoints"),
            reports_dir: PathBuf::from("reports"),
            page_size: 2000,
            checkpoint_interval: 10_000,
            request_delay: 0.033,
            retry_pause: 1.0,
            delete_batch_size: 100,
            delete_delay: 0.1,
            delete_checkpoint_interval: 100,
            delete_confirmation: true,
            batch_pause: 0.5,
            checkpoint_keep: 5,
            min_export_confidence: 0.0,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SweepError::InvalidConfig(format!("{}{}: cannot parse {:?}", ENV_PREFIX, key, value)))
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl SweepConfig {
    /// Defaults, overlaid by `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SweepError::InvalidConfig(e.to_string()))
    }

    /// Apply `SWEEP_*` overrides; other keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "DATABASE_PATH" => self.database_path = PathBuf::from(&value),
                "CHECKPOINTS_DIR" => self.checkpoints_dir = PathBuf::from(&value),
                "REPORTS_DIR" => self.reports_dir = PathBuf::from(&value),
                "PAGE_SIZE" => self.page_size = parse_env(name, &value)?,
                "CHECKPOINT_INTERVAL" => self.checkpoint_interval = parse_env(name, &value)?,
                "REQUEST_DELAY" => self.request_delay = parse_env(name, &value)?,
                "RETRY_PAUSE" => self.retry_pause = parse_env(name, &value)?,
                "DELETE_BATCH_SIZE" => self.delete_batch_size = parse_env(name, &value)?,
                "DELETE_DELAY" => self.delete_delay = parse_env(name, &value)?,
                "DELETE_CHECKPOINT_INTERVAL" => self.delete_checkpoint_interval = parse_env(name, &value)?,
                "DELETE_CONFIRMATION" => self.delete_confirmation = parse_env(name, &value)?,
                "BATCH_PAUSE" => self.batch_pause = parse_env(name, &value)?,
                "CHECKPOINT_KEEP" => self.checkpoint_keep = parse_env(name, &value)?,
                "MIN_EXPORT_CONFIDENCE" => self.min_export_confidence = parse_env(name, &value)?,
                other => tracing::debug!(key = other, "unknown configuration override ignored"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SweepError::InvalidConfig(msg));

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE_SETTING {
            return invalid(format!("page_size must be in 1..={}, got {}", MAX_PAGE_SIZE_SETTING, self.page_size));
        }
        if self.checkpoint_interval == 0 || self.delete_checkpoint_interval == 0 {
            return invalid("checkpoint intervals must be positive".to_string());
        }
        if self.delete_batch_size == 0 {
            return invalid("delete_batch_size must be positive".to_string());
        }
        for (name, value) in [("request_delay", self.request_delay), ("delete_delay", self.delete_delay)] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{} must be a positive number of seconds, got {}", name, value));
            }
        }
        for (name, value) in [("retry_pause", self.retry_pause), ("batch_pause", self.batch_pause)] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{} must not be negative, got {}", name, value));
            }
        }
        if !(0.0..=1.0).contains(&self.min_export_confidence) {
            return invalid(format!(
                "min_export_confidence must be in [0, 1], got {}",
                self.min_export_confidence
            ));
        }
        if self.checkpoint_keep == 0 {
            return invalid("checkpoint_keep must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.page_size,
            checkpoint_interval: self.checkpoint_interval,
            request_delay: seconds(self.request_delay),
            retry_pause: seconds(self.retry_pause),
        }
    }

    pub fn mutator_options(&self) -> MutatorOptions {
        MutatorOptions {
            batch_size: self.delete_batch_size,
            checkpoint_interval: self.delete_checkpoint_interval,
            delete_delay: seconds(self.delete_delay),
            batch_pause: seconds(self.batch_pause),
            confirm: self.delete_confirmation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());

        let fetch = config.fetch_options();
        assert_eq!(fetch.page_size, 2000);
        assert_eq!(fetch.effective_page_size(), 200);
        assert_eq!(fetch.request_delay, Duration::from_millis(33));

        let mutate = config.mutator_options();
        assert_eq!(mutate.batch_size, 100);
        assert!(mutate.confirm);
    }

    #[test]
    fn test_partial_toml() {
        let config = SweepConfig::from_toml(
            r#"
            page_size = 500
            delete_confirmation = false
            reports_dir = "/tmp/reports"
            "#,
        )
        .unwrap();

        assert_eq!(config.page_size, 500);
        assert!(!config.delete_confirmation);
        assert_eq!(config.reports_dir, PathBuf::from("/tmp/reports"));
        assert_eq!(config.checkpoint_interval, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SweepConfig::default();
        config
            .apply_env(vars(&[
                ("SWEEP_PAGE_SIZE", "150"),
                ("SWEEP_DELETE_DELAY", "0.25"),
                ("SWEEP_DELETE_CONFIRMATION", "false"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.page_size, 150);
        assert_eq!(config.delete_delay, 0.25);
        assert!(!config.delete_confirmation);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = SweepConfig::default();
        let err = config.apply_env(vars(&[("SWEEP_PAGE_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, SweepError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cases: [fn(&mut SweepConfig); 7] = [
            |c| c.page_size = 0,
            |c| c.page_size = 10_001,
            |c| c.request_delay = 0.0,
            |c| c.delete_delay = -1.0,
            |c| c.checkpoint_interval = 0,
            |c| c.min_export_confidence = 1.5,
            |c| c.batch_pause = f64::NAN,
        ];

        for mutate in cases {
            let mut config = SweepConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
        }
    }
}
