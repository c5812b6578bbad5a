//! HTTP client for the Telegram Bot API.
//!
//! Uses reqwest against `https://api.telegram.org/bot<token>/<method>`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{ApiResponse, Update};
use crate::broadcast::Deliverer;
use crate::error::DeliveryError;
use crate::registry::Recipient;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    /// Request timeout for each `sendMessage` attempt
    send_timeout: Duration,
}

impl TelegramClient {
    pub fn new(bot_token: &str, send_timeout: Duration) -> Self {
        Self::with_base_url(format!("{}/bot{}", TELEGRAM_API_URL, bot_token), send_timeout)
    }

    fn with_base_url(base_url: String, send_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            send_timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ApiResponse<T>, DeliveryError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(timeout.as_secs())
                } else {
                    // reqwest errors carry the URL, which embeds the token
                    DeliveryError::Network(e.without_url().to_string())
                }
            })?;

        // Telegram answers 4xx with a JSON body describing the problem
        resp.json::<ApiResponse<T>>()
            .await
            .map_err(|e| DeliveryError::Network(format!("Failed to parse {} response: {}", method, e.without_url())))
    }

    /// Send one message, falling back to plain text if Telegram rejects the
    /// Markdown entities.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let timeout = self.send_timeout;
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let resp: ApiResponse<serde_json::Value> = self.call("sendMessage", &body, timeout).await?;
        if resp.ok {
            return Ok(());
        }

        let description = resp.description.unwrap_or_default();
        if description.contains("can't parse entities") {
            log::debug!("Markdown rejected for chat {}, resending as plain text", chat_id);
            let plain = serde_json::json!({ "chat_id": chat_id, "text": text });
            let retry: ApiResponse<serde_json::Value> =
                self.call("sendMessage", &plain, timeout).await?;
            if retry.ok {
                return Ok(());
            }
            return Err(DeliveryError::Rejected(retry.description.unwrap_or_default()));
        }

        Err(DeliveryError::Rejected(description))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        let mut body = serde_json::json!({
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::json!(offset);
        }

        // Leave the server room to answer an idle long poll
        let timeout = Duration::from_secs(poll_timeout_secs + 10);
        let resp: ApiResponse<Vec<Update>> = self.call("getUpdates", &body, timeout).await?;
        if !resp.ok {
            return Err(DeliveryError::Rejected(resp.description.unwrap_or_default()));
        }
        Ok(resp.result.unwrap_or_default())
    }
}

#[async_trait]
impl Deliverer for TelegramClient {
    async fn deliver(&self, recipient: &Recipient, block: &str) -> Result<(), DeliveryError> {
        self.send_message(recipient.as_str(), block).await
    }
}
