use async_trait::async_trait;

/// Delivery seam between the interaction runtime and a concrete chat
/// transport. Implementations own message splitting and rate limiting.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Deliver `text` to `channel_id`. Returns `true` on success; errors
    /// are logged by the implementation, never propagated to the caller.
    async fn send(&self, channel_id: &str, text: &str) -> bool;
}

/// No-op transport used when no chat backend is configured and in tests.
pub struct NullTransport;

#[async_trait]
impl OutboundTransport for NullTransport {
    async fn send(&self, _channel_id: &str, _text: &str) -> bool {
        true
    }
}
