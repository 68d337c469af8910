//! Telegram adapter (teloxide).
//!
//! Implements the `tgm-core` MessagingPort over the Telegram Bot API and feeds
//! inbound updates into the monitor.

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::time::sleep;

pub mod control;
pub mod handlers;
pub mod router;
pub mod shutdown;

use tgm_core::{
    domain::{ChatId, MessageId, MessageRef, SenderHint},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, Recipient},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    /// Chat that `Recipient::Me` resolves to.
    owner_chat: Option<ChatId>,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, owner_chat: Option<ChatId>) -> Self {
        Self { bot, owner_chat }
    }

    fn tg_recipient(&self, to: &Recipient) -> Result<teloxide::types::Recipient> {
        match to {
            Recipient::Me => self
                .owner_chat
                .map(|c| teloxide::types::Recipient::Id(teloxide::types::ChatId(c.0)))
                .ok_or_else(|| Error::Config("target 'me' needs a numeric USER_ID".to_string())),
            Recipient::Chat(c) => Ok(teloxide::types::Recipient::Id(teloxide::types::ChatId(c.0))),
            Recipient::Username(u) => Ok(teloxide::types::Recipient::ChannelUsername(format!("@{u}"))),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        match e {
            teloxide::RequestError::Api(teloxide::ApiError::NotFound) => {
                Error::Unauthorized(format!("telegram rejected the bot token: {e}"))
            }
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_sender_lookup: true,
            max_message_len: 4096,
        }
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> Result<MessageRef> {
        let recipient = self.tg_recipient(to)?;
        let msg = self
            .with_retry(|| self.bot.send_message(recipient.clone(), text.to_string()))
            .await?;

        Ok(MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        })
    }

    async fn lookup_sender(&self, sender_id: &str) -> Result<Option<SenderHint>> {
        let Ok(id) = sender_id.trim().parse::<i64>() else {
            return Ok(None);
        };
        let chat = self
            .with_retry(|| self.bot.get_chat(teloxide::types::ChatId(id)))
            .await?;

        let hint = SenderHint {
            first_name: chat.first_name().map(str::to_string),
            last_name: chat.last_name().map(str::to_string),
            username: chat.username().map(str::to_string),
        };
        Ok((!hint.is_empty()).then_some(hint))
    }
}
