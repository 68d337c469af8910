use crate::{
    domain::{InboundEvent, SenderIdentity},
    rules::RuleSnapshot,
};

/// Which rule picked the single alert for a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertTrigger {
    Keyword(String),
    Pattern(String),
}

impl AlertTrigger {
    /// The bare keyword or pattern text, as pushed to the backend.
    pub fn text(&self) -> &str {
        match self {
            AlertTrigger::Keyword(k) | AlertTrigger::Pattern(k) => k,
        }
    }

    /// Entry recorded in the matched-keyword list.
    pub fn matched_entry(&self) -> String {
        match self {
            AlertTrigger::Keyword(k) => k.clone(),
            AlertTrigger::Pattern(p) => format!("regex:{p}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub matched_keywords: Vec<String>,
    pub alert_trigger: Option<AlertTrigger>,
    pub is_ai_trigger_sender: bool,
}

impl MatchResult {
    pub fn matched_anything(&self) -> bool {
        !self.matched_keywords.is_empty() || self.alert_trigger.is_some()
    }
}

/// Classify one event against one snapshot.
///
/// Returns `None` when the channel is filtered out by the allow-list.
/// Alert keywords are checked before regex patterns; the first hit wins.
pub fn classify(
    event: &InboundEvent,
    snapshot: &RuleSnapshot,
    identity: &SenderIdentity,
) -> Option<MatchResult> {
    if !snapshot.allows_channel(&event.channel_id) {
        return None;
    }

    let lowered = event.text.to_lowercase();

    let mut matched_keywords: Vec<String> = snapshot
        .monitor_keywords
        .iter()
        .filter(|k| k.is_in(&lowered))
        .map(|k| k.text.clone())
        .collect();

    let alert_trigger = snapshot
        .alert_keywords
        .iter()
        .find(|k| k.is_in(&lowered))
        .map(|k| AlertTrigger::Keyword(k.text.clone()))
        .or_else(|| {
            snapshot
                .alert_patterns
                .iter()
                .find(|p| p.is_match(&event.text))
                .map(|p| AlertTrigger::Pattern(p.source.clone()))
        });

    if let Some(trigger) = &alert_trigger {
        let entry = trigger.matched_entry();
        if !matched_keywords.contains(&entry) {
            matched_keywords.push(entry);
        }
    }

    Some(MatchResult {
        matched_keywords,
        alert_trigger,
        is_ai_trigger_sender: is_trigger_sender(event, snapshot, identity),
    })
}

fn is_trigger_sender(event: &InboundEvent, snapshot: &RuleSnapshot, identity: &SenderIdentity) -> bool {
    if !snapshot.ai_trigger_enabled || event.sender_id.is_none() {
        return false;
    }
    if snapshot.ai_trigger_identities.is_empty() {
        return false;
    }
    identity.candidates().iter().any(|c| {
        let c = c.to_lowercase();
        snapshot.ai_trigger_identities.iter().any(|t| *t == c)
    })
}
