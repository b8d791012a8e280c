//! The [`OutboundTransport`] implementation for Telegram.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use alyn_core::outbound::OutboundTransport;

use crate::api::TelegramApi;
use crate::send::split_chunks;

/// Pause between consecutive chunks of one reply, to respect rate limits
/// and keep messages arriving in order.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(500);

pub struct TelegramTransport {
    api: TelegramApi,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Self {
        Self {
            api: TelegramApi::new(bot_token),
        }
    }

    pub fn with_api(api: TelegramApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl OutboundTransport for TelegramTransport {
    async fn send(&self, channel_id: &str, text: &str) -> bool {
        let chunks = split_chunks(text);
        if chunks.is_empty() {
            return true;
        }

        let mut all_sent = true;
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            if !self.api.send_message(channel_id, chunk).await {
                warn!(channel_id, chunk_index = i, "failed to deliver chunk");
                all_sent = false;
            }
            if i < last {
                tokio::time::sleep(INTER_CHUNK_DELAY).await;
            }
        }
        all_sent
    }
}
