//! Modulkassa fiscalization API client.
//!
//! Request/response shapes for the four endpoints the integration needs:
//! associating a retail point, the service health gate, document submission
//! and document status polling. All calls are Basic-Auth JSON over HTTP
//! with a bounded timeout.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;

use crate::services::document::Document;

const NAIVE_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// Fiscalization service readiness, as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Associated,
    Ready,
    Disabled,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Associated => "ASSOCIATED",
            Self::Ready => "READY",
            Self::Disabled => "DISABLED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// External document lifecycle, as reported by submit/status responses.
///
/// `Unknown` absorbs statuses this build does not recognize; callers must
/// treat it as "log only, change nothing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Queued,
    Pending,
    Printed,
    WaitForCallback,
    Completed,
    Failed,
    Requeued,
    #[serde(other)]
    Unknown,
}

impl Default for DocumentStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Working credentials issued by the associate endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateResponse {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: ServiceStatus,
}

/// Raw fiscal metadata block; every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFiscalInfo {
    shift_number: Option<i64>,
    check_number: Option<i64>,
    kkt_number: Option<String>,
    fn_number: Option<String>,
    fn_doc_number: Option<i64>,
    fn_doc_mark: Option<i64>,
    date: Option<String>,
    sum: Option<f64>,
    qr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailureInfo {
    #[serde(rename = "type")]
    pub failure_type: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocumentDetails {
    #[serde(default)]
    status: DocumentStatus,
    message: Option<String>,
    // Kept opaque so a malformed block degrades instead of failing the
    // whole response.
    fiscal_info: Option<serde_json::Value>,
    failure_info: Option<FailureInfo>,
}

/// Fiscal metadata with the service timestamp normalized into a naive
/// date-time string plus a separate offset, the way billing storage keeps it.
#[derive(Debug, Clone, Default)]
pub struct FiscalInfo {
    pub shift_number: Option<i64>,
    pub check_number: Option<i64>,
    pub kkt_number: Option<String>,
    pub fn_number: Option<String>,
    pub fn_doc_number: Option<i64>,
    pub fn_doc_mark: Option<i64>,
    pub receipt_date: Option<String>,
    pub receipt_date_tz: Option<String>,
    pub sum: Option<f64>,
    pub qr: Option<String>,
}

/// Decoded view of a submit/status response.
#[derive(Debug, Clone)]
pub struct DocumentDetails {
    pub status: DocumentStatus,
    pub message: Option<String>,
    pub fiscal: FiscalInfo,
    pub failure: FailureInfo,
}

/// Basic-Auth credentials for the fiscalization API.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

/// Client for one register's fiscalization endpoint.
#[derive(Clone)]
pub struct ModulkassaClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ModulkassaClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Re-keys the client to the working credentials issued by `associate`.
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credentials,
        }
    }

    /// Registers the integration for a retail point and returns the
    /// account-specific working credentials.
    pub async fn associate(
        &self,
        retail_point_id: &str,
    ) -> Result<AssociateResponse, ClientError> {
        let url = format!("{}/v1/associate/{}", self.base_url, retail_point_id);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, body = %body, "associate response");

        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Queries the fiscalization service's readiness.
    pub async fn service_status(&self) -> Result<ServiceStatus, ClientError> {
        let url = format!("{}/v1/status", self.base_url);

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, body = %body, "service status response");

        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus { status, body });
        }
        let decoded: StatusResponse = serde_json::from_str(&body)?;
        Ok(decoded.status)
    }

    /// Submits a fiscal document.
    ///
    /// A non-2xx answer is reported as `Ok(None)` so the caller can leave
    /// the receipt in place for the next pass; resubmission is idempotent
    /// by document id on the service side.
    pub async fn submit_document(
        &self,
        document: &Document,
    ) -> Result<Option<DocumentDetails>, ClientError> {
        let url = format!("{}/v2/doc", self.base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .json(document)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, body = %body, "submit response");

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                doc_id = %document.id,
                "document submission rejected"
            );
            return Ok(None);
        }
        Ok(Some(parse_document_details(&body)?))
    }

    /// Fetches the current status of a submitted document; same non-raising
    /// convention as `submit_document`.
    pub async fn document_status(
        &self,
        external_id: &str,
    ) -> Result<Option<DocumentDetails>, ClientError> {
        let url = format!("{}/v1/doc/{}/status", self.base_url, external_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, body = %body, "document status response");

        if !status.is_success() {
            tracing::warn!(status = %status, external_id, "document status query rejected");
            return Ok(None);
        }
        Ok(Some(parse_document_details(&body)?))
    }
}

/// Decodes a submit/status response body.
///
/// A malformed fiscal-metadata block degrades to empty metadata; it must
/// never block a status transition that is otherwise decodable.
pub fn parse_document_details(body: &str) -> Result<DocumentDetails, ClientError> {
    let raw: RawDocumentDetails = serde_json::from_str(body)?;

    let fiscal = match raw.fiscal_info {
        Some(value) => match serde_json::from_value::<RawFiscalInfo>(value) {
            Ok(info) => {
                let (receipt_date, receipt_date_tz) = info
                    .date
                    .as_deref()
                    .map(parse_fiscal_date)
                    .unwrap_or((None, None));
                FiscalInfo {
                    shift_number: info.shift_number,
                    check_number: info.check_number,
                    kkt_number: info.kkt_number,
                    fn_number: info.fn_number,
                    fn_doc_number: info.fn_doc_number,
                    fn_doc_mark: info.fn_doc_mark,
                    receipt_date,
                    receipt_date_tz,
                    sum: info.sum,
                    qr: info.qr,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "malformed fiscalInfo block, recording empty metadata");
                FiscalInfo::default()
            }
        },
        None => FiscalInfo::default(),
    };

    Ok(DocumentDetails {
        status: raw.status,
        message: raw.message,
        fiscal,
        failure: raw.failure_info.unwrap_or_default(),
    })
}

/// Parses the service's heterogeneous ISO-8601 timestamps into a naive
/// date-time string and a normalized offset.
///
/// Accepts a trailing `Z` (with or without fractional seconds), explicit
/// `+HH:MM`/`+HHMM` offsets, and bare timestamps. Unparseable input yields
/// `(None, None)` rather than an error.
pub fn parse_fiscal_date(raw: &str) -> (Option<String>, Option<String>) {
    use chrono::{DateTime, NaiveDateTime};

    if raw.is_empty() {
        return (None, None);
    }

    // UTC marker, with or without fractional seconds.
    if let Some(stripped) = raw.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f") {
            return (
                Some(naive.format(NAIVE_FMT).to_string()),
                Some("+00:00".to_string()),
            );
        }
        return (None, None);
    }

    // Explicit offset, +HH:MM or +HHMM.
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return (
            Some(parsed.naive_local().format(NAIVE_FMT).to_string()),
            Some(parsed.format("%:z").to_string()),
        );
    }

    // Bare timestamp: no offset information to record.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return (Some(naive.format(NAIVE_FMT).to_string()), None);
    }

    (None, None)
}
