//! Task-local delivery context.
//!
//! The inbound surface knows which chat channel a turn came from; the
//! tools that deliver replies run several calls deeper with no channel
//! parameter in their LLM-facing schema. The channel id rides a task
//! local so every task spawned per inbound message sees its own value.

tokio::task_local! {
    static CURRENT_CHANNEL: Option<String>;
}

/// Run `fut` with `channel_id` visible via [`current_channel`].
pub async fn with_channel<F, T>(channel_id: Option<String>, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CHANNEL.scope(channel_id, fut).await
}

/// Channel id of the inbound message driving the current task, if any.
pub fn current_channel() -> Option<String> {
    CURRENT_CHANNEL
        .try_with(|channel| channel.clone())
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_is_scoped_to_task() {
        assert_eq!(current_channel(), None);
        let seen = with_channel(Some("42".to_string()), async { current_channel() }).await;
        assert_eq!(seen, Some("42".to_string()));
        assert_eq!(current_channel(), None);
    }
}
