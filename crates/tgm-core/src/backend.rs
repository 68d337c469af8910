use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Near-real-time "new message" signal for the backend's live feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub log_id: Uuid,
    pub channel: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub sender: String,
    pub message: String,
    pub keywords: Vec<String>,
    pub time: DateTime<Utc>,
    pub alerted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Bare alert keyword or regex source.
    pub keyword: String,
    pub message: String,
    pub from: String,
    pub channel: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(rename = "messageId")]
    pub message_id: i64,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiTriggerRequest {
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<Uuid>,
}

impl AiTriggerRequest {
    pub fn user_message(log_id: Option<Uuid>) -> Self {
        Self {
            trigger_type: "user_message".to_string(),
            log_id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAnalysis {
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub risk_level: Option<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiAnalysisResponse {
    pub success: bool,
    pub message_count: u64,
    pub analysis: AiAnalysis,
    pub error: Option<String>,
}

/// Backend HTTP API the monitor reports to.
#[async_trait]
pub trait BackendPort: Send + Sync {
    async fn notify(&self, payload: &NotifyPayload) -> Result<()>;

    async fn push_alert(&self, payload: &AlertPayload) -> Result<()>;

    async fn analyze(&self, request: &AiTriggerRequest) -> Result<AiAnalysisResponse>;
}
