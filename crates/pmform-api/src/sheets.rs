//! Destinations for accepted submissions.
//!
//! Production appends one row per submission to a Google Sheet through a
//! service account. Without credentials the server keeps rows in memory.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use url::Url;

use crate::config::GoogleSheetsConfig;
use crate::error::AppError;
use crate::validation::{
    AcBrand, BankApproval, BtuSize, MaintenanceForm, MeterType, OperatingStatus,
};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3_600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Columns A through AB.
pub const ROW_WIDTH: usize = 28;

const OTHER_LABEL: &str = "อื่นๆ";
const ABNORMAL_LABEL: &str = "ไม่ปกติ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReceipt {
    pub submission_id: String,
    pub updated_range: Option<String>,
}

pub trait SubmissionSink: Send + Sync {
    /// Persist one validated form as a row.
    fn append(
        &self,
        form: &MaintenanceForm,
    ) -> impl Future<Output = Result<AppendReceipt, AppError>> + Send;
}

/// Static dispatch over the configured sink.
pub enum SheetSink {
    Memory(InMemorySink),
    Google(GoogleSheetsSink),
}

impl SheetSink {
    pub fn from_config(config: Option<&GoogleSheetsConfig>) -> Result<Self, AppError> {
        match config {
            Some(config) => Ok(Self::Google(GoogleSheetsSink::new(config.clone())?)),
            None => {
                tracing::warn!("Google Sheets is not configured; submissions are kept in memory");
                Ok(Self::Memory(InMemorySink::new()))
            }
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Google(_) => "google_sheets",
        }
    }
}

impl SubmissionSink for SheetSink {
    async fn append(&self, form: &MaintenanceForm) -> Result<AppendReceipt, AppError> {
        match self {
            Self::Memory(sink) => sink.append(form).await,
            Self::Google(sink) => sink.append(form).await,
        }
    }
}

#[derive(Default)]
pub struct InMemorySink {
    rows: Mutex<Vec<Vec<String>>>,
    failure: Option<String>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every append fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl SubmissionSink for InMemorySink {
    async fn append(&self, form: &MaintenanceForm) -> Result<AppendReceipt, AppError> {
        if let Some(message) = &self.failure {
            return Err(AppError::persistence(message.clone()));
        }

        let now = Utc::now();
        let submission_id = new_submission_id(now);
        let row = build_row(&submission_id, &iso_timestamp(now), form);

        let mut rows = self
            .rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rows.push(row);
        let updated_range = format!("Memory!A{0}:AB{0}", rows.len());
        drop(rows);

        Ok(AppendReceipt {
            submission_id,
            updated_range: Some(updated_range),
        })
    }
}

pub struct GoogleSheetsSink {
    client: reqwest::Client,
    config: GoogleSheetsConfig,
    signing_key: EncodingKey,
    token_url: String,
    api_base: String,
    token: RwLock<TokenCache>,
}

#[derive(Default)]
struct TokenCache {
    access_token: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenCache {
    fn fresh(&self) -> Option<&str> {
        let expires_at = self.expires_at?;
        if Instant::now() + TOKEN_REFRESH_MARGIN >= expires_at {
            return None;
        }
        self.access_token.as_deref()
    }
}

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

impl GoogleSheetsSink {
    pub fn new(config: GoogleSheetsConfig) -> Result<Self, AppError> {
        Self::with_endpoints(config, TOKEN_URL, SHEETS_API_BASE)
    }

    pub fn with_endpoints(
        config: GoogleSheetsConfig,
        token_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, AppError> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes()).map_err(
            |error| {
                AppError::Config(format!(
                    "Invalid service account private key: {}",
                    sanitize(&error)
                ))
            },
        )?;

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            signing_key,
            token_url: token_url.into(),
            api_base: api_base.into(),
            token: RwLock::new(TokenCache::default()),
        })
    }

    async fn access_token(&self) -> Result<String, AppError> {
        {
            let cache = self.token.read().await;
            if let Some(token) = cache.fresh() {
                return Ok(token.to_string());
            }
        }

        let mut cache = self.token.write().await;
        if let Some(token) = cache.fresh() {
            return Ok(token.to_string());
        }

        let fetched = self.fetch_token().await?;
        cache.access_token = Some(fetched.access_token.clone());
        cache.expires_at = Some(Instant::now() + Duration::from_secs(fetched.expires_in));
        tracing::debug!(expires_in = fetched.expires_in, "Refreshed Google access token");
        Ok(fetched.access_token)
    }

    async fn invalidate_token(&self) {
        let mut cache = self.token.write().await;
        *cache = TokenCache::default();
    }

    fn signed_assertion(&self) -> Result<String, AppError> {
        let issued_at = Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &self.config.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_url,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key).map_err(|error| {
            AppError::internal(format!(
                "Service account assertion signing failed: {}",
                sanitize(&error)
            ))
        })
    }

    async fn fetch_token(&self) -> Result<TokenResponse, AppError> {
        let assertion = self.signed_assertion()?;
        let response = self
            .client
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|error| {
                AppError::external(format!("Token request failed: {}", sanitize(&error)))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external(format!(
                "Token request failed with HTTP {}: {}",
                status.as_u16(),
                compact_body(&body)
            )));
        }

        response.json::<TokenResponse>().await.map_err(|error| {
            AppError::external(format!("Token response parse failed: {}", sanitize(&error)))
        })
    }

    fn append_url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.api_base).map_err(|error| {
            AppError::Config(format!("Invalid Sheets API base URL: {}", sanitize(&error)))
        })?;
        let range = format!("{}!A:AB:append", self.config.sheet_name);
        url.path_segments_mut()
            .map_err(|()| AppError::Config("Sheets API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.config.spreadsheet_id.as_str(),
                "values",
                range.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        Ok(url)
    }
}

impl SubmissionSink for GoogleSheetsSink {
    async fn append(&self, form: &MaintenanceForm) -> Result<AppendReceipt, AppError> {
        let now = Utc::now();
        let submission_id = new_submission_id(now);
        let row = build_row(&submission_id, &iso_timestamp(now), form);

        let token = self.access_token().await?;
        let response = self
            .client
            .post(self.append_url()?)
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|error| {
                AppError::external(format!("Sheets append request failed: {}", sanitize(&error)))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external(format!(
                "Sheets append failed with HTTP {}: {}",
                status.as_u16(),
                compact_body(&body)
            )));
        }

        let payload = response.json::<AppendResponse>().await.map_err(|error| {
            AppError::external(format!("Sheets append parse failed: {}", sanitize(&error)))
        })?;
        let updated_range = payload.updates.and_then(|updates| updates.updated_range);
        tracing::info!(
            %submission_id,
            updated_range = updated_range.as_deref().unwrap_or_default(),
            "Appended submission row"
        );

        Ok(AppendReceipt {
            submission_id,
            updated_range,
        })
    }
}

pub fn new_submission_id(now: DateTime<Utc>) -> String {
    format!("ATM-{}", now.timestamp_millis())
}

fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Spreadsheet row for `form`, in column order A..AB.
pub fn build_row(submission_id: &str, timestamp: &str, form: &MaintenanceForm) -> Vec<String> {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    vec![
        submission_id.to_string(),
        timestamp.to_string(),
        form.date.clone(),
        form.time.clone(),
        form.location.clone(),
        form.machine_number.clone(),
        brand_label(form),
        btu_label(form),
        running_label(form.ac_status).to_string(),
        text(&form.ac_status_detail),
        running_label(form.timer_status).to_string(),
        text(&form.timer_status_detail),
        electric_label(form.electric_status).to_string(),
        form.ln_voltage.clone(),
        form.lg_voltage.clone(),
        form.gn_voltage.clone(),
        form.g_ohm.clone(),
        meter_label(form),
        text(&form.repair_details),
        text(&form.cannot_proceed),
        bank_label(form.bank_approval).to_string(),
        text(&form.not_approved_reason),
        form.refrigerant_pressure.clone(),
        form.refrigerant_added.clone(),
        text(&form.repair_work_detail),
        text(&form.suggestions),
        form.next_month.clone(),
        form.next_year.clone(),
    ]
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|value| !value.is_empty())
}

fn brand_label(form: &MaintenanceForm) -> String {
    match form.ac_brand {
        AcBrand::Daikin => "DAIKIN".to_string(),
        AcBrand::Carrier => "CARRIER".to_string(),
        AcBrand::Other => non_empty(form.brand_other_text.as_ref())
            .unwrap_or(OTHER_LABEL)
            .to_string(),
    }
}

fn btu_label(form: &MaintenanceForm) -> String {
    match form.btu {
        BtuSize::Btu9000 => "9,000 BTU".to_string(),
        BtuSize::Btu12000 => "12,000 BTU".to_string(),
        BtuSize::Other => non_empty(form.btu_other_text.as_ref())
            .unwrap_or(OTHER_LABEL)
            .to_string(),
    }
}

const fn running_label(status: OperatingStatus) -> &'static str {
    match status {
        OperatingStatus::Normal => "ทำงานปกติ",
        OperatingStatus::Abnormal => ABNORMAL_LABEL,
    }
}

const fn electric_label(status: OperatingStatus) -> &'static str {
    match status {
        OperatingStatus::Normal => "ปกติ",
        OperatingStatus::Abnormal => ABNORMAL_LABEL,
    }
}

fn meter_label(form: &MaintenanceForm) -> String {
    match form.meter {
        MeterType::Installed => non_empty(form.meter_number.as_ref())
            .map_or_else(|| "มี".to_string(), |number| format!("มี ({number})")),
        MeterType::NoMeter => "ไม่มี".to_string(),
        MeterType::SiteSupply => "ใช้ไฟฟ้าของสถานที่".to_string(),
        MeterType::NotRequested => "ไม่ได้ขอมิเตอร์ใหม่".to_string(),
    }
}

const fn bank_label(approval: BankApproval) -> &'static str {
    match approval {
        BankApproval::Approved => "อนุมัติให้ดำเนินการ",
        BankApproval::NotApproved => "ไม่อนุมัติ",
    }
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

fn compact_body(body: &str) -> String {
    body.trim().chars().take(180).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::validation::tests::valid_payload;
    use crate::validation::validate_form;

    const TEST_PRIVATE_KEY: &str = include_str!("../testdata/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../testdata/service_account_pub.pem");

    fn form_from(overrides: Value) -> MaintenanceForm {
        let mut payload = valid_payload();
        if let (Some(fields), Some(extra)) = (payload.as_object_mut(), overrides.as_object()) {
            for (key, value) in extra {
                fields.insert(key.clone(), value.clone());
            }
        }
        validate_form(&payload).unwrap()
    }

    #[test]
    fn row_has_every_column_in_order() {
        let row = build_row("ATM-1", "2026-10-19T02:30:00.000Z", &form_from(json!({})));

        assert_eq!(row.len(), ROW_WIDTH);
        assert_eq!(&row[..8], &[
            "ATM-1",
            "2026-10-19T02:30:00.000Z",
            "2026-10-19",
            "09:30",
            "Branch 12 Silom",
            "1234",
            "DAIKIN",
            "12,000 BTU",
        ]);
        assert_eq!(row[8], "ทำงานปกติ");
        assert_eq!(row[9], "");
        assert_eq!(row[12], "ปกติ");
        assert_eq!(row[17], "มี (M-778)");
        assert_eq!(row[20], "อนุมัติให้ดำเนินการ");
        assert_eq!(&row[26..], &["04", "2027"]);
    }

    #[test]
    fn other_and_abnormal_choices_use_detail_text() {
        let form = form_from(json!({
            "ac_brand": "other",
            "brand_other_text": "Mitsubishi",
            "btu": "other",
            "btu_other_text": "18,000 BTU",
            "timer_status": "abnormal",
            "timer_status_detail": "Clock drifts",
            "electric_status": "abnormal",
            "meter": "location",
            "bank_approval": "not_approved",
            "not_approved_reason": "Budget",
        }));
        let row = build_row("ATM-2", "t", &form);

        assert_eq!(row[6], "Mitsubishi");
        assert_eq!(row[7], "18,000 BTU");
        assert_eq!(row[10], "ไม่ปกติ");
        assert_eq!(row[11], "Clock drifts");
        assert_eq!(row[12], "ไม่ปกติ");
        assert_eq!(row[17], "ใช้ไฟฟ้าของสถานที่");
        assert_eq!(row[20], "ไม่อนุมัติ");
        assert_eq!(row[21], "Budget");
    }

    #[test]
    fn meter_labels_cover_every_choice() {
        assert_eq!(meter_label(&form_from(json!({"meter": "none"}))), "ไม่มี");
        assert_eq!(
            meter_label(&form_from(json!({"meter": "not_requested"}))),
            "ไม่ได้ขอมิเตอร์ใหม่"
        );
    }

    #[test]
    fn submission_ids_use_epoch_millis() {
        let now = DateTime::parse_from_rfc3339("2026-10-19T00:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(new_submission_id(now), format!("ATM-{}", now.timestamp_millis()));
        assert_eq!(iso_timestamp(now), "2026-10-19T00:00:00.123Z");
    }

    #[tokio::test]
    async fn memory_sink_records_rows() {
        let sink = InMemorySink::new();
        let receipt = sink.append(&form_from(json!({}))).await.unwrap();

        assert!(receipt.submission_id.starts_with("ATM-"));
        assert_eq!(receipt.updated_range.as_deref(), Some("Memory!A1:AB1"));
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.rows()[0][0], receipt.submission_id);
    }

    #[tokio::test]
    async fn failing_memory_sink_reports_persistence_error() {
        let sink = InMemorySink::failing("disk full");
        let err = sink.append(&form_from(json!({}))).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(message) if message == "disk full"));
    }

    #[derive(Default)]
    struct MockGoogle {
        token_calls: AtomicUsize,
        fail_append: bool,
        appends: Mutex<Vec<(String, String, Option<String>, Value)>>,
    }

    async fn token_endpoint(
        State(mock): State<Arc<MockGoogle>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<Value> {
        mock.token_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(form["grant_type"], JWT_BEARER_GRANT);
        assert_eq!(form["assertion"].split('.').count(), 3);
        Json(json!({"access_token": "test-access-token", "expires_in": 3600}))
    }

    async fn append_endpoint(
        State(mock): State<Arc<MockGoogle>>,
        Path((spreadsheet_id, range)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let authorization = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        mock.appends.lock().unwrap().push((
            format!("{spreadsheet_id}/{range}?{}", query["valueInputOption"]),
            range.clone(),
            authorization,
            body,
        ));
        if mock.fail_append {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"message": "backend error"}})),
            );
        }
        (
            StatusCode::OK,
            Json(json!({"updates": {"updatedRange": "Sheet1!A2:AB2"}})),
        )
    }

    async fn spawn_mock_google(mock: Arc<MockGoogle>) -> String {
        let app = Router::new()
            .route("/token", post(token_endpoint))
            .route(
                "/v4/spreadsheets/{spreadsheet_id}/values/{range}",
                post(append_endpoint),
            )
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn sheets_config() -> GoogleSheetsConfig {
        GoogleSheetsConfig {
            client_email: "forms@project.iam.gserviceaccount.com".to_string(),
            private_key: TEST_PRIVATE_KEY.to_string(),
            spreadsheet_id: "sheet-123".to_string(),
            sheet_name: "Sheet1".to_string(),
        }
    }

    #[tokio::test]
    async fn google_sink_appends_with_cached_token() {
        let mock = Arc::new(MockGoogle::default());
        let base = spawn_mock_google(Arc::clone(&mock)).await;
        let sink =
            GoogleSheetsSink::with_endpoints(sheets_config(), format!("{base}/token"), &base)
                .unwrap();

        let first = sink.append(&form_from(json!({}))).await.unwrap();
        sink.append(&form_from(json!({}))).await.unwrap();

        assert_eq!(first.updated_range.as_deref(), Some("Sheet1!A2:AB2"));
        assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);

        let appends = mock.appends.lock().unwrap();
        assert_eq!(appends.len(), 2);
        let (target, range, authorization, body) = &appends[0];
        assert_eq!(target, "sheet-123/Sheet1!A:AB:append?USER_ENTERED");
        assert_eq!(range, "Sheet1!A:AB:append");
        assert_eq!(authorization.as_deref(), Some("Bearer test-access-token"));
        let row = body["values"][0].as_array().unwrap();
        assert_eq!(row.len(), ROW_WIDTH);
        assert_eq!(row[0], json!(first.submission_id));
    }

    #[test]
    fn service_account_assertion_is_signed_for_token_endpoint() {
        let sink = GoogleSheetsSink::with_endpoints(
            sheets_config(),
            "http://127.0.0.1:9/token",
            "http://127.0.0.1:9",
        )
        .unwrap();
        let assertion = sink.signed_assertion().unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["http://127.0.0.1:9/token"]);
        validation.set_issuer(&["forms@project.iam.gserviceaccount.com"]);
        let decoded = decode::<Value>(
            &assertion,
            &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims["scope"], SHEETS_SCOPE);
    }

    #[tokio::test]
    async fn failed_append_is_an_external_error() {
        let mock = Arc::new(MockGoogle {
            fail_append: true,
            ..MockGoogle::default()
        });
        let base = spawn_mock_google(Arc::clone(&mock)).await;
        let sink =
            GoogleSheetsSink::with_endpoints(sheets_config(), format!("{base}/token"), &base)
                .unwrap();

        let err = sink.append(&form_from(json!({}))).await.unwrap_err();

        assert!(matches!(&err, AppError::External(message) if message.contains("HTTP 500")));
    }

    #[test]
    fn invalid_private_key_is_a_config_error() {
        let config = GoogleSheetsConfig {
            private_key: "not a key".to_string(),
            ..sheets_config()
        };
        assert!(matches!(
            GoogleSheetsSink::new(config),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn sheet_name_is_escaped_in_append_url() {
        let config = GoogleSheetsConfig {
            sheet_name: "PM Log".to_string(),
            ..sheets_config()
        };
        let sink = GoogleSheetsSink::new(config).unwrap();
        assert_eq!(
            sink.append_url().unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/PM%20Log!A:AB:append?valueInputOption=USER_ENTERED"
        );
    }
}
