use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::{
    backend::{AiTriggerRequest, AlertPayload, NotifyPayload},
    classifier::{classify, MatchResult},
    dispatch::{AiTriggerJob, DispatchTask, Dispatcher},
    domain::{InboundEvent, SenderIdentity},
    identity::IdentityResolver,
    messaging::types::Recipient,
    rules::{RuleSnapshot, RuleStore},
    store::LogRecord,
};

/// Per-event pipeline: filter, resolve, classify, plan, submit.
pub struct Monitor {
    rules: Arc<RuleStore>,
    identities: IdentityResolver,
    dispatcher: Arc<Dispatcher>,
}

impl Monitor {
    pub fn new(rules: Arc<RuleStore>, identities: IdentityResolver, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            rules,
            identities,
            dispatcher,
        }
    }

    /// Handle one inbound message. Returns how many tasks were submitted.
    ///
    /// Never waits on task execution.
    pub async fn handle(&self, event: &InboundEvent) -> usize {
        if event.text.trim().is_empty() {
            return 0;
        }

        let snapshot = self.rules.current();
        if !snapshot.allows_channel(&event.channel_id) {
            return 0;
        }

        let identity = self.identities.resolve(event).await;
        let Some(result) = classify(event, &snapshot, &identity) else {
            return 0;
        };

        let tasks = plan_tasks(event, &identity, &result, &snapshot, Uuid::new_v4());
        if !result.matched_keywords.is_empty() {
            debug!(
                channel = %event.channel_display_name,
                sender = %identity.display,
                keywords = ?result.matched_keywords,
                "message matched"
            );
        }

        let n = tasks.len();
        for task in tasks {
            self.dispatcher.submit(task);
        }
        n
    }
}

/// Decide which side effects a classified message gets.
pub fn plan_tasks(
    event: &InboundEvent,
    identity: &SenderIdentity,
    result: &MatchResult,
    snapshot: &RuleSnapshot,
    log_id: Uuid,
) -> Vec<DispatchTask> {
    let matched = !result.matched_keywords.is_empty();
    if !matched && !snapshot.log_all_messages {
        return Vec::new();
    }

    let mut tasks = Vec::with_capacity(4);
    tasks.push(DispatchTask::Persist(LogRecord {
        id: log_id,
        channel: event.channel_display_name.clone(),
        channel_id: event.channel_id.clone(),
        sender: identity.display.clone(),
        message: event.text.clone(),
        keywords: result.matched_keywords.clone(),
        time: event.received_at,
        message_id: event.message_id,
        alerted: matched,
        ai_analyzed: false,
        user_id: snapshot.owner_user_id.clone(),
    }));
    tasks.push(DispatchTask::Notify(NotifyPayload {
        log_id,
        channel: event.channel_display_name.clone(),
        channel_id: event.channel_id.clone(),
        sender: identity.display.clone(),
        message: event.text.clone(),
        keywords: result.matched_keywords.clone(),
        time: event.received_at,
        alerted: matched,
    }));

    if let Some(trigger) = &result.alert_trigger {
        tasks.push(DispatchTask::AlertPush(AlertPayload {
            keyword: trigger.text().to_string(),
            message: event.text.clone(),
            from: identity.display.clone(),
            channel: event.channel_display_name.clone(),
            channel_id: event.channel_id.clone(),
            message_id: event.message_id,
            user_id: snapshot.owner_user_id.clone(),
        }));
    }

    if result.is_ai_trigger_sender && result.matched_anything() {
        let reply_to = event
            .sender_id
            .as_deref()
            .and_then(|id| Recipient::parse(id).ok());
        if let Some(reply_to) = reply_to {
            tasks.push(DispatchTask::AiTrigger(AiTriggerJob {
                request: AiTriggerRequest::user_message(Some(log_id)),
                reply_to,
            }));
        }
    }

    tasks
}
