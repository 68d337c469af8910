use std::fmt;

use crate::{domain::ChatId, Error, Result};

/// Destination of an outbound message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// The account owner's own chat.
    Me,
    Chat(ChatId),
    /// Public `@username` of a user or channel (stored without the `@`).
    Username(String),
}

impl Recipient {
    /// Parse an operator-supplied target: `me`, a numeric chat id, or `@name`/`name`.
    pub fn parse(target: &str) -> Result<Self> {
        let t = target.trim();
        if t.is_empty() {
            return Err(Error::Config("empty send target".to_string()));
        }
        if t.eq_ignore_ascii_case("me") {
            return Ok(Recipient::Me);
        }
        if let Ok(id) = t.parse::<i64>() {
            return Ok(Recipient::Chat(ChatId(id)));
        }
        let name = t.trim_start_matches('@');
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!("invalid send target: {target:?}")));
        }
        Ok(Recipient::Username(name.to_string()))
    }

    /// Stable key used for per-destination throttling.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Me => f.write_str("me"),
            Recipient::Chat(id) => write!(f, "{}", id.0),
            Recipient::Username(u) => write!(f, "@{u}"),
        }
    }
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_sender_lookup: bool,
    pub max_message_len: usize,
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        Self {
            supports_sender_lookup: true,
            max_message_len: 4096,
        }
    }
}
