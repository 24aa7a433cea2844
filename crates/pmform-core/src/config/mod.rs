//! Runtime configuration for client apps, read from the environment.

use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::is_http_url;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
const DATA_DIR_NAME: &str = "pmform";
const DATABASE_FILE_NAME: &str = "pmform.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Could not determine a data directory; set PMFORM_DATA_DIR")]
    NoDataDir,
}

/// Client settings: API location, local storage, and timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub data_dir: PathBuf,
    pub autosave_delay: Duration,
    pub health_poll_interval: Duration,
    pub health_timeout: Duration,
    pub reconnect_settle: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = value_or_default(&lookup, "PMFORM_API_BASE_URL", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(
                "PMFORM_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let data_dir = match optional_trimmed(&lookup, "PMFORM_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(DATA_DIR_NAME),
        };

        Ok(Self {
            api_base_url,
            data_dir,
            autosave_delay: Duration::from_secs(bounded(
                &lookup,
                "PMFORM_AUTOSAVE_DELAY_SECS",
                30,
                1..=3_600,
            )?),
            health_poll_interval: Duration::from_secs(bounded(
                &lookup,
                "PMFORM_HEALTH_POLL_SECS",
                30,
                1..=3_600,
            )?),
            health_timeout: Duration::from_secs(bounded(
                &lookup,
                "PMFORM_HEALTH_TIMEOUT_SECS",
                5,
                1..=60,
            )?),
            reconnect_settle: Duration::from_millis(bounded(
                &lookup,
                "PMFORM_RECONNECT_SETTLE_MS",
                2_000,
                0..=60_000,
            )?),
            request_timeout: Duration::from_secs(bounded(
                &lookup,
                "PMFORM_REQUEST_TIMEOUT_SECS",
                15,
                1..=300,
            )?),
        })
    }

    /// SQLite file holding drafts and the offline queue.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = raw.parse::<u64>().map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ClientConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[("PMFORM_DATA_DIR", "/tmp/pmform-test")]).unwrap();

        assert_eq!(config.api_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.autosave_delay, Duration::from_secs(30));
        assert_eq!(config.health_poll_interval, Duration::from_secs(30));
        assert_eq!(config.health_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_settle, Duration::from_millis(2_000));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/pmform-test/pmform.db")
        );
    }

    #[test]
    fn overrides_are_parsed_and_trimmed() {
        let config = config_from(&[
            ("PMFORM_DATA_DIR", "/tmp/pmform-test"),
            ("PMFORM_API_BASE_URL", " https://forms.example.com/ "),
            ("PMFORM_AUTOSAVE_DELAY_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(config.api_base_url, "https://forms.example.com");
        assert_eq!(config.autosave_delay, Duration::from_secs(5));
    }

    #[test]
    fn rejects_out_of_range_and_invalid_values() {
        let err = config_from(&[
            ("PMFORM_DATA_DIR", "/tmp/pmform-test"),
            ("PMFORM_HEALTH_TIMEOUT_SECS", "0"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PMFORM_HEALTH_TIMEOUT_SECS"));

        let err = config_from(&[
            ("PMFORM_DATA_DIR", "/tmp/pmform-test"),
            ("PMFORM_API_BASE_URL", "forms.example.com"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PMFORM_API_BASE_URL"));
    }
}
