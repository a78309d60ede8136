#![warn(missing_docs)]
//! # threatscope-gateway
//!
//! ## Purpose
//! Stateless request/response mapping onto the analysis service REST boundary.
//!
//! ## Responsibilities
//! - Define the [`AnalysisGateway`] seam consumed by controllers.
//! - Provide the reqwest-backed [`HttpGateway`] implementation.
//! - Validate base URL and timeout configuration ([`GatewayConfig`]).
//! - Normalize failures into the [`GatewayError`] taxonomy.
//!
//! ## Data flow
//! Controller call -> [`AnalysisGateway`] method -> HTTP request built from
//! [`GatewayConfig::endpoint`] -> status check -> JSON decode into
//! `threatscope-core` records.
//!
//! ## Ownership and lifetimes
//! Gateways are shared as `Arc<dyn AnalysisGateway>`; every response is
//! decoded into owned records before returning.
//!
//! ## Error model
//! Structured backend error bodies become [`GatewayError::Server`] with the
//! backend message preserved verbatim. Deadline expiry is
//! [`GatewayError::Timeout`], distinct from [`GatewayError::Transport`].
//!
//! ## Security and privacy notes
//! Request logging records operation names and analysis ids only, never file
//! bytes or response bodies.

mod error;
mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use threatscope_core::{
    AnalysisCreated, AnalysisDetail, AnalysisLogs, AnalysisStatus, AnalysisSummary,
    NotificationsUnread, StagedFile,
};
use url::Url;

pub use error::{FailureClass, GatewayError, classify_gateway_error, error_from_body};
pub use http::HttpGateway;

/// Env var overriding the API base URL.
pub const ENV_API_BASE_URL: &str = "THREATSCOPE_API_BASE_URL";
/// Env var overriding the per-request timeout in milliseconds.
pub const ENV_API_TIMEOUT_MS: &str = "THREATSCOPE_API_TIMEOUT_MS";
/// Default API base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/v1";
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Lower bound accepted for the timeout override.
pub const MIN_TIMEOUT_MS: u64 = 100;
/// Page size requested from the list endpoint.
pub const LIST_PAGE_SIZE: usize = 100;

/// Request/response boundary of the analysis service.
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// `POST /analyses` with the staged file as multipart field `file`.
    async fn create_analysis(&self, file: &StagedFile) -> Result<AnalysisCreated, GatewayError>;

    /// `GET /analyses`, optionally filtered by status.
    async fn list_analyses(
        &self,
        status: Option<AnalysisStatus>,
    ) -> Result<Vec<AnalysisSummary>, GatewayError>;

    /// `GET /analyses/{id}`.
    async fn get_analysis(&self, id: &str) -> Result<AnalysisDetail, GatewayError>;

    /// `GET /analyses/{id}/logs`.
    async fn get_logs(&self, id: &str) -> Result<AnalysisLogs, GatewayError>;

    /// `DELETE /analyses/{id}`; irreversible.
    async fn delete_analysis(&self, id: &str) -> Result<(), GatewayError>;

    /// `GET /notifications/unread`.
    async fn unread_notifications(&self) -> Result<NotificationsUnread, GatewayError>;

    /// `POST /notifications/{id}/read`; idempotent on the server.
    async fn mark_notification_read(&self, id: &str) -> Result<(), GatewayError>;

    /// `GET /health`; `true` only for `{"status": "healthy"}`.
    async fn check_health(&self) -> bool;

    /// URL of `GET /analyses/{id}/image`. Never fetched by the core.
    fn image_url(&self, id: &str) -> String;
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    base_url: Url,
    timeout: Duration,
    user_agent: String,
}

impl GatewayConfig {
    /// Builds a validated configuration.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] when the URL does not parse, is
    /// not `http`/`https`, or cannot carry path segments.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let parsed = Url::parse(base_url.trim())
            .map_err(|error| GatewayError::InvalidConfig(format!("invalid base url: {error}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(GatewayError::InvalidConfig(
                "base url must use http or https".to_string(),
            ));
        }
        if parsed.cannot_be_a_base() {
            return Err(GatewayError::InvalidConfig(
                "base url cannot carry path segments".to_string(),
            ));
        }

        Ok(Self {
            base_url: parsed,
            timeout,
            user_agent: format!("threatscope/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Loads configuration from the environment, falling back to defaults.
    ///
    /// Timeout values below [`MIN_TIMEOUT_MS`] or unparsable values fall back
    /// to [`DEFAULT_TIMEOUT_MS`].
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] when the base URL override is invalid.
    pub fn from_env() -> Result<Self, GatewayError> {
        let base_url = std::env::var(ENV_API_BASE_URL)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let timeout_ms = std::env::var(ENV_API_TIMEOUT_MS)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|value| *value >= MIN_TIMEOUT_MS)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Self::new(&base_url, Duration::from_millis(timeout_ms))
    }

    /// Replaces the `User-Agent` sent with every request.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Configured base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-request timeout passed through to the transport.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `User-Agent` header value.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Joins path segments onto the base URL, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalysisListEnvelope {
    Page { items: Vec<AnalysisSummary> },
    Bare(Vec<AnalysisSummary>),
}

/// Decodes a list response given as a bare array or a paginated envelope.
///
/// # Errors
/// Returns [`GatewayError::Decode`] when neither shape matches.
pub fn decode_analysis_list(raw: &[u8]) -> Result<Vec<AnalysisSummary>, GatewayError> {
    let envelope: AnalysisListEnvelope =
        serde_json::from_slice(raw).map_err(|error| GatewayError::Decode(error.to_string()))?;

    Ok(match envelope {
        AnalysisListEnvelope::Page { items } => items,
        AnalysisListEnvelope::Bare(items) => items,
    })
}

#[cfg(test)]
mod tests {
    //! Unit tests for endpoint construction and list decoding.

    use super::*;

    #[test]
    fn endpoint_keeps_base_path_and_encodes_ids() {
        let config = GatewayConfig::new("http://api.test/api/v1/", Duration::from_secs(1))
            .expect("config should build");
        let url = config.endpoint(&["analyses", "a b/c", "logs"]);
        assert_eq!(url.as_str(), "http://api.test/api/v1/analyses/a%20b%2Fc/logs");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(GatewayConfig::new("ftp://api.test/", Duration::from_secs(1)).is_err());
        assert!(GatewayConfig::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn decodes_paginated_and_bare_lists() {
        let row = r#"{"id":"a","code":"AN-1","status":"OPEN","created_at":"2025-01-01T00:00:00Z"}"#;
        let page = format!(r#"{{"items":[{row}],"total":1,"page":1,"size":100,"pages":1}}"#);
        let bare = format!("[{row}]");

        assert_eq!(decode_analysis_list(page.as_bytes()).expect("page").len(), 1);
        assert_eq!(decode_analysis_list(bare.as_bytes()).expect("bare").len(), 1);
        assert!(decode_analysis_list(br#"{"rows":[]}"#).is_err());
    }
}
