//! Minimal Telegram Bot API client.
//!
//! Tries Markdown first and retries in plain text when Telegram rejects
//! the parse mode (usually unbalanced markup in LLM output).

use std::time::Duration;

use tracing::{debug, error, info, warn};

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    /// Override the API host, for tests.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post(&self, method: &str, body: serde_json::Value) -> bool {
        let url = format!("{}/{method}", self.base_url);
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                warn!(method, status, body = %text.chars().take(200).collect::<String>(), "Telegram API error");
                false
            }
            Err(e) => {
                error!(method, error = %e, "Telegram request failed");
                false
            }
        }
    }

    /// Send one message; returns delivery success.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> bool {
        let markdown = self
            .post(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "Markdown",
                }),
            )
            .await;
        if markdown {
            info!(chat_id, length = text.len(), "Telegram message sent");
            return true;
        }

        // Markdown rejected; retry without a parse mode.
        debug!(chat_id, "retrying Telegram send as plain text");
        let plain = self
            .post(
                "sendMessage",
                serde_json::json!({"chat_id": chat_id, "text": text}),
            )
            .await;
        if plain {
            info!(chat_id, length = text.len(), "Telegram message sent (plain text)");
        }
        plain
    }

    /// Show the typing indicator; failures are irrelevant.
    pub async fn send_typing(&self, chat_id: &str) {
        let _ = self
            .post(
                "sendChatAction",
                serde_json::json!({"chat_id": chat_id, "action": "typing"}),
            )
            .await;
    }
}
