use async_trait::async_trait;

use crate::{
    domain::{MessageRef, SenderHint},
    messaging::types::{MessagingCapabilities, Recipient},
    Result,
};

/// Messenger port used by the monitor.
///
/// Covers outbound plain-text delivery (AI summaries, operator sends) and the
/// sender-profile lookup used to enrich identities.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, to: &Recipient, text: &str) -> Result<MessageRef>;

    /// Fetch profile fields for a sender id. `Ok(None)` when the transport
    /// knows nothing about it.
    async fn lookup_sender(&self, sender_id: &str) -> Result<Option<SenderHint>>;
}
