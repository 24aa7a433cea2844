use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::{apply_rate_limit_headers, AppError};
use crate::idempotency::{idempotency_key, IdempotencyCache};
use crate::rate_limit::{client_fingerprint, client_ip, RateLimitMetricsSnapshot, RateLimiter};
use crate::sanitize::{sanitize_form_data, SanitizedPayload};
use crate::sheets::{SheetSink, SubmissionSink};
use crate::validation::validate_form;

pub const SUBMIT_SUCCESS_MESSAGE: &str = "บันทึกข้อมูลสำเร็จ";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub limiter: RateLimiter,
    pub idempotency: IdempotencyCache,
    sink: Arc<SheetSink>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let sink = SheetSink::from_config(config.google_sheets.as_ref())?;
        Ok(Self::with_sink(config, sink))
    }

    pub fn with_sink(config: Arc<AppConfig>, sink: SheetSink) -> Self {
        Self {
            limiter: RateLimiter::from_config(&config),
            idempotency: IdempotencyCache::new(config.idempotency_ttl),
            sink: Arc::new(sink),
            config,
        }
    }

    pub fn sink(&self) -> &SheetSink {
        &self.sink
    }
}

pub fn app_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/submit-form", post(submit_form))
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    sink: &'static str,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        sink: state.sink.kind(),
        rate_limit: state.limiter.metrics_snapshot(),
    })
}

async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identifier = client_ip(request.headers());
    let decision = state.limiter.check(&identifier);
    if !decision.allowed {
        return Err(AppError::TooManyRequests(decision));
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(&mut response, &decision);
    Ok(response)
}

async fn api_not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    submission_id: String,
    message: &'static str,
}

impl SubmitResponse {
    const fn saved(submission_id: String) -> Self {
        Self {
            success: true,
            submission_id,
            message: SUBMIT_SUCCESS_MESSAGE,
        }
    }
}

async fn submit_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitResponse>, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|error| AppError::bad_request(format!("Malformed JSON body: {error}")))?;

    let client = client_fingerprint(&client_ip(&headers));
    let SanitizedPayload {
        sanitized,
        warnings,
    } = sanitize_form_data(&payload);
    if !warnings.is_empty() {
        tracing::warn!(client, ?warnings, "Suspicious content in submission");
    }

    let form = validate_form(&sanitized).map_err(|errors| {
        tracing::info!(client, error_count = errors.len(), "Rejected invalid submission");
        AppError::Validation(errors)
    })?;

    let key = idempotency_key(&headers);
    if let Some(key) = key.as_deref() {
        if let Some(submission_id) = state.idempotency.lookup(key) {
            tracing::info!(client, %submission_id, "Replayed idempotent submission");
            return Ok(Json(SubmitResponse::saved(submission_id)));
        }
    }

    let receipt = state.sink.append(&form).await?;
    if let Some(key) = key.as_deref() {
        state.idempotency.remember(key, &receipt.submission_id);
    }
    tracing::info!(
        client,
        submission_id = %receipt.submission_id,
        sink = state.sink.kind(),
        "Accepted submission"
    );
    Ok(Json(SubmitResponse::saved(receipt.submission_id)))
}
