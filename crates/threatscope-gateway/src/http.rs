//! reqwest-backed gateway implementation.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use threatscope_core::{
    AnalysisCreated, AnalysisDetail, AnalysisLogs, AnalysisStatus, AnalysisSummary,
    NotificationsUnread, StagedFile,
};
use tracing::debug;

use crate::error::from_reqwest;
use crate::{
    AnalysisGateway, GatewayConfig, GatewayError, LIST_PAGE_SIZE, decode_analysis_list,
    error_from_body,
};

/// HTTP gateway over the analysis service REST API.
#[derive(Clone)]
pub struct HttpGateway {
    config: GatewayConfig,
    http: Client,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.config.base_url().as_str())
            .field("timeout", &self.config.timeout())
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Builds an HTTP gateway.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] when the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent())
            .build()
            .map_err(|error| GatewayError::InvalidConfig(format!("http client: {error}")))?;

        Ok(Self { config, http })
    }

    /// Gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status.as_u16(), &body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await.map_err(from_reqwest)?;
    serde_json::from_slice(&bytes).map_err(|error| GatewayError::Decode(error.to_string()))
}

#[async_trait]
impl AnalysisGateway for HttpGateway {
    async fn create_analysis(&self, file: &StagedFile) -> Result<AnalysisCreated, GatewayError> {
        debug!(stage = "gateway", action = "create_analysis", bytes = file.len(), "request");

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(file.content_type)
            .map_err(from_reqwest)?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.config.endpoint(&["analyses"]))
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;
        read_json(response).await
    }

    async fn list_analyses(
        &self,
        status: Option<AnalysisStatus>,
    ) -> Result<Vec<AnalysisSummary>, GatewayError> {
        debug!(stage = "gateway", action = "list_analyses", status = ?status, "request");

        let mut url = self.config.endpoint(&["analyses"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("size", &LIST_PAGE_SIZE.to_string());
            if let Some(status) = status {
                query.append_pair("status", status.as_str());
            }
        }

        let response = self.http.get(url).send().await.map_err(from_reqwest)?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(from_reqwest)?;
        decode_analysis_list(&bytes)
    }

    async fn get_analysis(&self, id: &str) -> Result<AnalysisDetail, GatewayError> {
        debug!(stage = "gateway", action = "get_analysis", id, "request");
        let response = self
            .http
            .get(self.config.endpoint(&["analyses", id]))
            .send()
            .await
            .map_err(from_reqwest)?;
        read_json(response).await
    }

    async fn get_logs(&self, id: &str) -> Result<AnalysisLogs, GatewayError> {
        debug!(stage = "gateway", action = "get_logs", id, "request");
        let response = self
            .http
            .get(self.config.endpoint(&["analyses", id, "logs"]))
            .send()
            .await
            .map_err(from_reqwest)?;
        read_json(response).await
    }

    async fn delete_analysis(&self, id: &str) -> Result<(), GatewayError> {
        debug!(stage = "gateway", action = "delete_analysis", id, "request");
        let response = self
            .http
            .delete(self.config.endpoint(&["analyses", id]))
            .send()
            .await
            .map_err(from_reqwest)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn unread_notifications(&self) -> Result<NotificationsUnread, GatewayError> {
        debug!(stage = "gateway", action = "unread_notifications", "request");
        let response = self
            .http
            .get(self.config.endpoint(&["notifications", "unread"]))
            .send()
            .await
            .map_err(from_reqwest)?;
        read_json(response).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), GatewayError> {
        debug!(stage = "gateway", action = "mark_notification_read", id, "request");
        let response = self
            .http
            .post(self.config.endpoint(&["notifications", id, "read"]))
            .send()
            .await
            .map_err(from_reqwest)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn check_health(&self) -> bool {
        let response = match self.http.get(self.config.endpoint(&["health"])).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(stage = "gateway", action = "check_health", error = %error, "unreachable");
                return false;
            }
        };

        match read_json::<HealthBody>(response).await {
            Ok(body) => body.status == "healthy",
            Err(error) => {
                debug!(stage = "gateway", action = "check_health", error = %error, "unhealthy");
                false
            }
        }
    }

    fn image_url(&self, id: &str) -> String {
        self.config.endpoint(&["analyses", id, "image"]).to_string()
    }
}
