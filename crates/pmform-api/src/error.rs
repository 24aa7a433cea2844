use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::rate_limit::RateLimitDecision;
use crate::validation::FieldError;

pub const VALIDATION_FAILED_MESSAGE: &str = "ข้อมูลไม่ถูกต้อง";
pub const SAVE_FAILED_MESSAGE: &str = "เกิดข้อผิดพลาดในการบันทึกข้อมูล";
pub const NOT_FOUND_MESSAGE: &str = "ไม่พบปลายทางที่ร้องขอ";
pub const RATE_LIMITED_MESSAGE: &str =
    "มีการส่งคำขอมากเกินไป กรุณารอสักครู่แล้วลองใหม่อีกครั้ง";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("No route for {0}")]
    NotFound(String),
    #[error("Too many requests, retry in {}s", .0.reset_in_secs)]
    TooManyRequests(RateLimitDecision),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("External dependency error: {0}")]
    External(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitedBody {
    success: bool,
    message: &'static str,
    error: &'static str,
    retry_after: u64,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Persistence(_) | Self::Config(_) | Self::External(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Validation(errors) => {
                let body = ErrorBody {
                    success: false,
                    message: VALIDATION_FAILED_MESSAGE,
                    errors: Some(&errors),
                };
                (status, Json(body)).into_response()
            }
            Self::BadRequest(detail) => {
                tracing::debug!(%detail, "Rejected malformed request");
                let errors = [FieldError::new("body", detail)];
                let body = ErrorBody {
                    success: false,
                    message: VALIDATION_FAILED_MESSAGE,
                    errors: Some(&errors),
                };
                (status, Json(body)).into_response()
            }
            Self::NotFound(path) => {
                tracing::debug!(%path, "No API route");
                let body = ErrorBody {
                    success: false,
                    message: NOT_FOUND_MESSAGE,
                    errors: None,
                };
                (status, Json(body)).into_response()
            }
            Self::TooManyRequests(decision) => {
                let body = RateLimitedBody {
                    success: false,
                    message: RATE_LIMITED_MESSAGE,
                    error: "Too Many Requests",
                    retry_after: decision.reset_in_secs,
                };
                let mut response = (status, Json(body)).into_response();
                apply_rate_limit_headers(&mut response, &decision);
                response
                    .headers_mut()
                    .insert("retry-after", HeaderValue::from(decision.reset_in_secs));
                response
            }
            other => {
                // Details stay in the logs; clients get a generic message.
                tracing::error!(error = %other, "Request failed");
                let body = ErrorBody {
                    success: false,
                    message: SAVE_FAILED_MESSAGE,
                    errors: None,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Copy a limiter decision into the `X-RateLimit-*` headers.
pub fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at_ms));
}
