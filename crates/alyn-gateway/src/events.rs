//! Agent-event pump: feeds execution-agent completions back into the
//! interaction runtime as agent messages.
//!
//! Events are processed sequentially; agent updates are low-volume and
//! ordering keeps the conversation log coherent. The originating delivery
//! channel is restored around each turn so replies can reach the user.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use alyn_agents::InteractionRuntime;
use alyn_core::context::with_channel;
use alyn_core::types::AgentEvent;

pub async fn run_event_pump(
    mut events_rx: mpsc::Receiver<AgentEvent>,
    interaction: Arc<InteractionRuntime>,
) {
    while let Some(event) = events_rx.recv().await {
        debug!(agent = %event.agent_name, "processing agent completion");
        let result = with_channel(
            event.channel_id.clone(),
            interaction.handle_agent_message(&event.message),
        )
        .await;
        if !result.success {
            warn!(
                agent = %event.agent_name,
                error = ?result.error,
                "agent completion turn failed"
            );
        }
    }
    debug!("agent event channel closed, pump exiting");
}
