//! Backend HTTP API adapter (notify, alert push, AI analysis).

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tgm_core::{
    backend::{AiAnalysisResponse, AiTriggerRequest, AlertPayload, BackendPort, NotifyPayload},
    errors::Error,
    Result,
};
use tracing::debug;

const NOTIFY_PATH: &str = "/api/internal/message-notify";
const ALERT_PATH: &str = "/api/internal/alert/push";
const ANALYZE_PATH: &str = "/api/internal/ai/analyze-now";

#[derive(Clone, Debug)]
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::External(format!("backend client build error: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("backend request error ({path}): {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "backend {path} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        debug!(path, status = %resp.status(), "backend call ok");
        Ok(resp)
    }

    async fn post_json<R: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<R> {
        self.post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| Error::External(format!("backend json error ({path}): {e}")))
    }
}

#[async_trait]
impl BackendPort for HttpBackend {
    async fn notify(&self, payload: &NotifyPayload) -> Result<()> {
        self.post(NOTIFY_PATH, payload).await.map(|_| ())
    }

    async fn push_alert(&self, payload: &AlertPayload) -> Result<()> {
        self.post(ALERT_PATH, payload).await.map(|_| ())
    }

    async fn analyze(&self, request: &AiTriggerRequest) -> Result<AiAnalysisResponse> {
        self.post_json(ANALYZE_PATH, request).await
    }
}
