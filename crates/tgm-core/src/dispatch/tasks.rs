use std::{fmt, future::Future, sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    backend::{AiTriggerRequest, AlertPayload, BackendPort, NotifyPayload},
    formatting::{format_ai_summary, truncate_text},
    messaging::{port::MessagingPort, types::Recipient},
    retry::{with_retry, RetryError, RetryPolicy},
    store::{LogRecord, LogStore},
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Persist,
    Notify,
    Alert,
    Ai,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [TaskKind::Persist, TaskKind::Notify, TaskKind::Alert, TaskKind::Ai];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Persist => "persist",
            TaskKind::Notify => "notify",
            TaskKind::Alert => "alert",
            TaskKind::Ai => "ai",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TaskKind::Persist => 0,
            TaskKind::Notify => 1,
            TaskKind::Alert => 2,
            TaskKind::Ai => 3,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AI analysis request plus where to deliver the summary.
#[derive(Clone, Debug, PartialEq)]
pub struct AiTriggerJob {
    pub request: AiTriggerRequest,
    pub reply_to: Recipient,
}

/// One side effect of a classified message. Executed exactly once.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchTask {
    Persist(LogRecord),
    Notify(NotifyPayload),
    AlertPush(AlertPayload),
    AiTrigger(AiTriggerJob),
}

impl DispatchTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            DispatchTask::Persist(_) => TaskKind::Persist,
            DispatchTask::Notify(_) => TaskKind::Notify,
            DispatchTask::AlertPush(_) => TaskKind::Alert,
            DispatchTask::AiTrigger(_) => TaskKind::Ai,
        }
    }
}

/// Per-kind limits on a single external call.
#[derive(Clone, Copy, Debug)]
pub struct TaskTimeouts {
    pub persist: Duration,
    pub notify: Duration,
    pub alert: Duration,
    pub ai: Duration,
    /// Delivery of the AI summary back to the chat.
    pub reply: Duration,
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            persist: Duration::from_secs(10),
            notify: Duration::from_secs(3),
            alert: Duration::from_secs(10),
            ai: Duration::from_secs(120),
            reply: Duration::from_secs(10),
        }
    }
}

/// Runs tasks against the collaborators. Failures are logged, never returned.
pub struct TaskExecutor {
    store: Arc<dyn LogStore>,
    backend: Arc<dyn BackendPort>,
    messenger: Arc<dyn MessagingPort>,
    timeouts: TaskTimeouts,
    store_retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn LogStore>,
        backend: Arc<dyn BackendPort>,
        messenger: Arc<dyn MessagingPort>,
        timeouts: TaskTimeouts,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            messenger,
            timeouts,
            store_retry,
        }
    }

    pub async fn run(&self, task: DispatchTask) {
        match task {
            DispatchTask::Persist(record) => self.persist(record).await,
            DispatchTask::Notify(payload) => self.notify(payload).await,
            DispatchTask::AlertPush(payload) => self.push_alert(payload).await,
            DispatchTask::AiTrigger(job) => self.trigger_ai(job).await,
        }
    }

    async fn persist(&self, record: LogRecord) {
        let limit = self.timeouts.persist;
        let store = &self.store;
        let rec = &record;
        let res = with_retry(self.store_retry, Error::is_resource_busy, move || {
            bounded(limit, store.insert(rec))
        })
        .await;
        match res {
            Ok(()) => debug!(log_id = %record.id, "log record stored"),
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(log_id = %record.id, attempts, error = %last, "log store busy, record not stored")
            }
            Err(RetryError::Fatal(e)) => {
                error!(log_id = %record.id, error = %e, "failed to store log record")
            }
        }
    }

    async fn notify(&self, payload: NotifyPayload) {
        if let Err(e) = bounded(self.timeouts.notify, self.backend.notify(&payload)).await {
            debug!(log_id = %payload.log_id, error = %e, "message notify failed");
        }
    }

    async fn push_alert(&self, payload: AlertPayload) {
        match bounded(self.timeouts.alert, self.backend.push_alert(&payload)).await {
            Ok(()) => info!(keyword = %payload.keyword, channel = %payload.channel, "alert pushed"),
            Err(e) => warn!(keyword = %payload.keyword, error = %e, "alert push failed"),
        }
    }

    async fn trigger_ai(&self, job: AiTriggerJob) {
        info!(log_id = ?job.request.log_id, "triggering AI analysis");
        let result = match bounded(self.timeouts.ai, self.backend.analyze(&job.request)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "AI analysis request failed");
                return;
            }
        };
        if !result.success {
            warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "AI analysis reported failure"
            );
            return;
        }

        let max_len = self.messenger.capabilities().max_message_len;
        let text = truncate_text(&format_ai_summary(&result), max_len);
        match bounded(self.timeouts.reply, self.messenger.send_text(&job.reply_to, &text)).await {
            Ok(_) => info!(to = %job.reply_to, "AI summary sent"),
            Err(e) => warn!(to = %job.reply_to, error = %e, "failed to send AI summary"),
        }
    }
}

/// Await `fut` for at most `limit`.
pub(crate) async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
}
