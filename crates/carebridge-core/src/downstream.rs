//! Downstream practice-management system client.
//!
//! The sync worker treats this as an injectable collaborator: anything
//! implementing [`DownstreamClient`] can stand in for the real API, which
//! is how the worker tests script failures. Every failure mode — network,
//! auth, validation, rate-limit — surfaces as a [`DownstreamError`] that
//! the worker records uniformly as one failed attempt.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the practice-management API
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("Invalid downstream configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Downstream HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Downstream API error: {0}")]
    Api(String),
    #[error("Invalid downstream response payload: {0}")]
    InvalidPayload(String),
}

pub type DownstreamResult<T> = Result<T, DownstreamError>;

/// Capability to create the corresponding record on the external system.
///
/// The payload is the opaque request body fixed at enqueue time; the
/// returned value is the downstream-assigned record identifier.
#[allow(async_fn_in_trait)]
pub trait DownstreamClient {
    async fn create_record(&self, payload: &[u8]) -> DownstreamResult<String>;
}

/// HTTP client for the practice-management API
#[derive(Clone)]
pub struct PmsClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for PmsClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PmsClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl PmsClient {
    /// Create a client for the given API base URL and key
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> DownstreamResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(DownstreamError::InvalidConfiguration(
                "API key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            api_key,
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }
}

impl DownstreamClient for PmsClient {
    async fn create_record(&self, payload: &[u8]) -> DownstreamResult<String> {
        let response = self
            .client
            .post(format!("{}/appointments", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(payload.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<CreateRecordResponse>().await?;
        payload.into_external_id()
    }
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    id: Option<String>,
    external_id: Option<String>,
}

impl CreateRecordResponse {
    fn into_external_id(self) -> DownstreamResult<String> {
        self.external_id
            .or(self.id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DownstreamError::InvalidPayload(
                    "response did not include external_id/id".to_string(),
                )
            })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> DownstreamResult<String> {
    let base_url = raw.trim();
    if base_url.is_empty() {
        return Err(DownstreamError::InvalidConfiguration(
            "base URL must not be empty".to_string(),
        ));
    }
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(DownstreamError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("   ".to_string()).is_err());
        assert!(normalize_base_url("pms.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_base_url_trims_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://pms.example.com/api/".to_string()).unwrap(),
            "https://pms.example.com/api"
        );
    }

    #[test]
    fn client_rejects_empty_api_key() {
        let error = PmsClient::new("https://pms.example.com", "  ").err().unwrap();
        assert!(error.to_string().contains("API key must not be empty"));
    }

    #[test]
    fn client_debug_redacts_api_key() {
        let client = PmsClient::new("https://pms.example.com", "secret-key").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn create_record_response_prefers_external_id() {
        let response = CreateRecordResponse {
            id: Some("row-1".to_string()),
            external_id: Some(" pms-9 ".to_string()),
        };
        assert_eq!(response.into_external_id().unwrap(), "pms-9");
    }

    #[test]
    fn create_record_response_requires_some_id() {
        let response = CreateRecordResponse {
            id: None,
            external_id: Some("   ".to_string()),
        };
        assert!(response.into_external_id().is_err());
    }

    #[test]
    fn parse_api_error_extracts_message() {
        let parsed = parse_api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "slot already booked"}"#,
        );
        assert_eq!(parsed, "slot already booked (422)");
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            "slow down (429)"
        );
    }
}
