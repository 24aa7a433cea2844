use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_sweep_interval: Duration,
    pub idempotency_ttl: Duration,
    pub google_sheets: Option<GoogleSheetsConfig>,
}

/// Service-account credentials and target sheet for row appends.
#[derive(Clone, PartialEq, Eq)]
pub struct GoogleSheetsConfig {
    pub client_email: String,
    pub private_key: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

impl fmt::Debug for GoogleSheetsConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GoogleSheetsConfig")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_name", &self.sheet_name)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_sweep_interval", &self.rate_limit_sweep_interval)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .field("google_sheets", &self.google_sheets)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_sweep_interval: Duration::from_secs(600),
            idempotency_ttl: Duration::from_secs(86_400),
            google_sheets: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "PMFORM_API_BIND_ADDR", "127.0.0.1:8080");

        let rate_limit_max_requests =
            value_or_default(&lookup, "RATE_LIMIT_MAX_REQUESTS", "10")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "RATE_LIMIT_MAX_REQUESTS must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&rate_limit_max_requests) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_MAX_REQUESTS must be in [1, 1000]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [1, 3600]".to_string(),
                )
            })?;
        if !(1..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [1, 3600]".to_string(),
            ));
        }

        let sweep_secs = value_or_default(&lookup, "RATE_LIMIT_SWEEP_SECS", "600")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_SWEEP_SECS must be an integer in [10, 86400]".to_string(),
                )
            })?;
        if !(10..=86_400).contains(&sweep_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_SWEEP_SECS must be in [10, 86400]".to_string(),
            ));
        }

        let idempotency_ttl_secs = value_or_default(&lookup, "IDEMPOTENCY_TTL_SECS", "86400")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "IDEMPOTENCY_TTL_SECS must be an integer in [60, 604800]".to_string(),
                )
            })?;
        if !(60..=604_800).contains(&idempotency_ttl_secs) {
            return Err(ConfigError::Invalid(
                "IDEMPOTENCY_TTL_SECS must be in [60, 604800]".to_string(),
            ));
        }

        let google_sheets = parse_google_sheets_config(&lookup)?;

        Ok(Self {
            bind_addr,
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            rate_limit_sweep_interval: Duration::from_secs(sweep_secs),
            idempotency_ttl: Duration::from_secs(idempotency_ttl_secs),
            google_sheets,
        })
    }
}

fn parse_google_sheets_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<GoogleSheetsConfig>, ConfigError> {
    let client_email = optional_trimmed(&lookup, "GOOGLE_SHEETS_CLIENT_EMAIL");
    let private_key = optional_trimmed(&lookup, "GOOGLE_SHEETS_PRIVATE_KEY");
    let spreadsheet_id = optional_trimmed(&lookup, "GOOGLE_SPREADSHEET_ID");

    let any_set = client_email.is_some() || private_key.is_some() || spreadsheet_id.is_some();
    if !any_set {
        return Ok(None);
    }

    let client_email = client_email.ok_or(ConfigError::MissingVar("GOOGLE_SHEETS_CLIENT_EMAIL"))?;
    let private_key = private_key.ok_or(ConfigError::MissingVar("GOOGLE_SHEETS_PRIVATE_KEY"))?;
    let spreadsheet_id = spreadsheet_id.ok_or(ConfigError::MissingVar("GOOGLE_SPREADSHEET_ID"))?;
    let sheet_name = value_or_default(&lookup, "GOOGLE_SHEET_NAME", "Sheet1");

    Ok(Some(GoogleSheetsConfig {
        client_email,
        // Keys pasted into a single-line env var carry literal `\n` sequences.
        private_key: private_key.replace("\\n", "\n"),
        spreadsheet_id,
        sheet_name,
    }))
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
