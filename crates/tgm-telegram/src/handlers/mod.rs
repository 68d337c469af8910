//! Telegram update handlers.
//!
//! Group/supergroup messages and channel posts are converted into
//! `InboundEvent`s and handed to the monitor; nothing is replied inline.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::trace;

use tgm_core::domain::{InboundEvent, SenderHint};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(event) = inbound_event(&msg) else {
        trace!(chat_id = msg.chat.id.0, "update without text ignored");
        return Ok(());
    };
    state.monitor.handle(&event).await;
    Ok(())
}

/// Convert a Telegram message (or channel post) into the monitor's event type.
///
/// Returns `None` for messages that carry neither text nor a caption.
pub fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let text = msg.text().or_else(|| msg.caption())?.to_string();

    let channel_display_name = msg
        .chat
        .title()
        .map(str::to_string)
        .or_else(|| msg.chat.username().map(|u| format!("@{u}")))
        .unwrap_or_else(|| "Unknown".to_string());

    let (sender_id, sender_hint) = match (msg.from(), msg.sender_chat()) {
        (Some(user), None) => (
            Some(user.id.0.to_string()),
            SenderHint {
                first_name: Some(user.first_name.clone()),
                last_name: user.last_name.clone(),
                username: user.username.clone(),
            },
        ),
        // Posts signed by a chat (channels, anonymous admins) have no user sender.
        (_, Some(chat)) => (
            None,
            SenderHint {
                first_name: chat.title().map(str::to_string),
                last_name: None,
                username: chat.username().map(str::to_string),
            },
        ),
        (None, None) => (None, SenderHint::default()),
    };

    Some(InboundEvent {
        channel_id: msg.chat.id.0.to_string(),
        channel_display_name,
        sender_id,
        sender_hint,
        text,
        message_id: i64::from(msg.id.0),
        received_at: msg.date,
    })
}
