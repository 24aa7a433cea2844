//! HTTP client for the form submission API.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::SubmissionId;
use crate::network::HealthProbe;
use crate::queue::SubmissionTransport;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Path of the submission endpoint relative to the API base URL.
pub const SUBMIT_PATH: &str = "/api/submit-form";

/// Path of the liveness endpoint used for connectivity checks.
pub const HEALTH_PATH: &str = "/healthz";

/// Header carrying the queue item id on every delivery attempt.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Request never produced a response (offline, DNS, timeout, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Server refused the submission; retrying the same payload will not help
    #[error("Submission rejected ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        errors: Vec<String>,
    },

    /// Server failed while handling the submission
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),
}

impl SubmitError {
    /// Whether the submission should be kept in the offline queue.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for SubmitError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

/// Server acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Spreadsheet submission id (`ATM-<epoch ms>`)
    pub submission_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    submission_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<FieldErrorBody>,
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FieldErrorBody {
    path: String,
    message: String,
}

/// Client for `POST /api/submit-form` and the `/healthz` probe.
#[derive(Debug, Clone)]
pub struct SubmitClient {
    base_url: String,
    health_url: String,
    client: reqwest::Client,
}

impl SubmitClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SubmitError> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                SubmitError::InvalidConfiguration(format!(
                    "Failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            health_url: format!("{base_url}{HEALTH_PATH}"),
            base_url,
            client,
        })
    }

    /// Probe a different URL for connectivity instead of `{base}/healthz`.
    #[must_use]
    pub fn with_health_url(mut self, health_url: impl Into<String>) -> Self {
        self.health_url = health_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn submit_form(
        &self,
        payload: &Value,
        idempotency_key: &SubmissionId,
    ) -> Result<SubmitReceipt, SubmitError> {
        let response = self
            .client
            .post(format!("{}{SUBMIT_PATH}", self.base_url))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key.as_str())
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let retry_after_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<SubmitResponseBody>(&body).ok();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_header
                .or_else(|| parsed.as_ref().and_then(|body| body.retry_after))
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(SubmitError::RateLimited { retry_after_secs });
        }

        if status.is_success() {
            return parse_receipt(parsed, &body);
        }

        let message = parsed
            .as_ref()
            .and_then(|body| body.message.clone())
            .unwrap_or_else(|| fallback_message(status, &body));
        if status.is_server_error() {
            return Err(SubmitError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let errors = parsed
            .map(|body| {
                body.errors
                    .into_iter()
                    .map(|error| format!("{}: {}", error.path, error.message))
                    .collect()
            })
            .unwrap_or_default();
        Err(SubmitError::Rejected {
            status: status.as_u16(),
            message,
            errors,
        })
    }

    /// `HEAD {health_url}`; any 2xx means the server is reachable.
    pub async fn check_health(&self) -> bool {
        match self.client.head(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "Health check failed");
                false
            }
        }
    }
}

impl SubmissionTransport for SubmitClient {
    async fn submit(
        &self,
        payload: &Value,
        idempotency_key: &SubmissionId,
    ) -> Result<SubmitReceipt, SubmitError> {
        self.submit_form(payload, idempotency_key).await
    }
}

impl HealthProbe for SubmitClient {
    async fn probe(&self) -> bool {
        self.check_health().await
    }
}

fn parse_receipt(
    parsed: Option<SubmitResponseBody>,
    raw: &str,
) -> Result<SubmitReceipt, SubmitError> {
    let body = parsed.ok_or_else(|| {
        SubmitError::InvalidResponse(format!("unparseable body: {}", compact_text(raw)))
    })?;
    if !body.success {
        return Err(SubmitError::InvalidResponse(
            body.message
                .unwrap_or_else(|| "success flag missing from response".to_string()),
        ));
    }
    let submission_id = normalize_text_option(body.submission_id).ok_or_else(|| {
        SubmitError::InvalidResponse("response did not include submissionId".to_string())
    })?;
    Ok(SubmitReceipt {
        submission_id,
        message: body.message.unwrap_or_default(),
    })
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> Result<String, SubmitError> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        SubmitError::InvalidConfiguration("API base URL must not be empty".to_string())
    })?;
    if !is_http_url(&base_url) {
        return Err(SubmitError::InvalidConfiguration(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base_url.trim_end_matches('/').to_string())
}
