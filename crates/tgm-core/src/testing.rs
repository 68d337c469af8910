//! Hand-written fakes for the ports, shared by unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    backend::{AiAnalysis, AiAnalysisResponse, AiTriggerRequest, AlertPayload, BackendPort, NotifyPayload},
    domain::{ChatId, MessageId, MessageRef, SenderHint},
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, Recipient},
    },
    store::{LogRecord, LogStore},
    Error, Result,
};

#[derive(Default)]
pub struct FakeStore {
    pub records: Mutex<Vec<LogRecord>>,
    /// Number of leading inserts that fail with `ResourceBusy`.
    pub busy_for: AtomicUsize,
}

#[async_trait]
impl LogStore for FakeStore {
    async fn insert(&self, record: &LogRecord) -> Result<()> {
        let busy = self
            .busy_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(Error::ResourceBusy {
                resource: "fake.lock".to_string(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub notifies: Mutex<Vec<NotifyPayload>>,
    pub alerts: Mutex<Vec<AlertPayload>>,
    pub analyses: Mutex<Vec<AiTriggerRequest>>,
    pub delay: Duration,
    /// Extra latency on `analyze` only.
    pub analyze_delay: Duration,
    pub fail_notify: bool,
    pub fail_alert: bool,
    pub fail_analyze: bool,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendPort for FakeBackend {
    async fn notify(&self, payload: &NotifyPayload) -> Result<()> {
        if self.fail_notify {
            return Err(Error::External("backend down".into()));
        }
        self.notifies.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn push_alert(&self, payload: &AlertPayload) -> Result<()> {
        self.enter().await;
        if self.fail_alert {
            return Err(Error::External("alert sink down".into()));
        }
        self.alerts.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn analyze(&self, request: &AiTriggerRequest) -> Result<AiAnalysisResponse> {
        self.enter().await;
        if !self.analyze_delay.is_zero() {
            tokio::time::sleep(self.analyze_delay).await;
        }
        if self.fail_analyze {
            return Err(Error::External("analyzer down".into()));
        }
        self.analyses.lock().unwrap().push(request.clone());
        Ok(AiAnalysisResponse {
            success: true,
            message_count: 3,
            analysis: AiAnalysis {
                sentiment: Some("neutral".into()),
                sentiment_score: Some(0.5),
                risk_level: Some("low".into()),
                summary: Some("quiet day".into()),
                keywords: vec!["btc".into()],
            },
            error: None,
        })
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<(Recipient, String)>>,
    pub profile: Option<SenderHint>,
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities::default()
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> Result<MessageRef> {
        self.sent.lock().unwrap().push((to.clone(), text.to_string()));
        Ok(MessageRef {
            chat_id: ChatId(1),
            message_id: MessageId(1),
        })
    }

    async fn lookup_sender(&self, _sender_id: &str) -> Result<Option<SenderHint>> {
        Ok(self.profile.clone())
    }
}
