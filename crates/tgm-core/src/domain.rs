use chrono::{DateTime, Utc};

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Name fields the transport attached to the sender, if any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SenderHint {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl SenderHint {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.username.is_none()
    }
}

/// One inbound message as seen by the monitor. Read-only.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub channel_id: String,
    pub channel_display_name: String,
    pub sender_id: Option<String>,
    pub sender_hint: SenderHint,
    pub text: String,
    pub message_id: i64,
    pub received_at: DateTime<Utc>,
}

/// Resolved sender identity used for attribution and AI-trigger matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderIdentity {
    pub id: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    /// Composed display string: `Full Name (@username)`, `Full Name`, `@username`,
    /// the raw id, or the channel display name.
    pub display: String,
}

impl SenderIdentity {
    /// Every string a trigger-list entry may be compared against.
    pub fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(4);
        if let Some(id) = &self.id {
            out.push(id.clone());
        }
        if let Some(u) = &self.username {
            out.push(format!("@{u}"));
        }
        if let Some(n) = &self.full_name {
            out.push(n.clone());
        }
        out.push(self.display.clone());
        out.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
