//! Staff notifications through the Telegram Bot API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    config::TelegramConfig,
    error::{AppError, AppResult},
};

/// Outbound channel for staff notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> AppResult<()>;
}

pub struct TelegramClient {
    http: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(http: Client, api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    /// Build a client when both token and chat id are configured
    pub fn from_config(http: Client, config: &TelegramConfig) -> Option<Self> {
        match (config.bot_token.as_deref(), config.chat_id.as_deref()) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Some(Self::new(http, &config.api_base, token, chat_id))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_message(&self, text: &str) -> AppResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .http
            .post(url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Telegram request failed: {}", e)))?;

        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid Telegram response: {}", e)))?;

        if !status.is_success() || !body.ok {
            return Err(AppError::Internal(format!(
                "Telegram returned {}: {}",
                status.as_u16(),
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Used when no bot is configured
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send_message(&self, text: &str) -> AppResult<()> {
        tracing::debug!(chars = text.len(), "Telegram not configured, notification dropped");
        Ok(())
    }
}
