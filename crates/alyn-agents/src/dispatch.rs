//! Execution dispatch: builds a per-agent runtime on demand, runs it, and
//! forwards the completion back into the interaction pipeline as an agent
//! message.
//!
//! Spawned runs are detached; their failures never surface to the caller
//! directly. They land in the agent journal and reach the user later via
//! the agent-message path.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use alyn_core::types::{AgentEvent, ExecutionResult};
use alyn_triggers::{AgentRunner, TriggerStore};

use crate::execution::ExecutionRuntime;
use crate::journal::AgentJournal;
use crate::llm::ChatClient;
use crate::tools::{triggers::build_trigger_tools, ToolRegistry};

pub struct ExecutionDispatcher {
    client: Arc<dyn ChatClient>,
    journal: Arc<AgentJournal>,
    triggers: Arc<TriggerStore>,
    model: String,
    max_tokens: u32,
    timezone: String,
    events_tx: mpsc::Sender<AgentEvent>,
}

impl ExecutionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChatClient>,
        journal: Arc<AgentJournal>,
        triggers: Arc<TriggerStore>,
        model: String,
        max_tokens: u32,
        timezone: String,
        events_tx: mpsc::Sender<AgentEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            journal,
            triggers,
            model,
            max_tokens,
            timezone,
            events_tx,
        })
    }

    fn runtime_for(&self, agent_name: &str) -> ExecutionRuntime {
        let registry = ToolRegistry::new(build_trigger_tools(
            self.triggers.clone(),
            agent_name,
            &self.timezone,
        ));
        ExecutionRuntime::new(
            agent_name.to_string(),
            self.model.clone(),
            self.max_tokens,
            self.client.clone(),
            registry,
            self.journal.clone(),
            None,
        )
    }

    /// Run an agent to completion and forward the outcome as an
    /// [`AgentEvent`] carrying the current delivery channel.
    pub async fn execute_agent(&self, agent_name: &str, instructions: &str) -> ExecutionResult {
        let result = self.runtime_for(agent_name).execute(instructions).await;
        let status = if result.success { "SUCCESS" } else { "FAILED" };
        info!(agent = agent_name, status, "agent completed");

        let mut event = AgentEvent::from_result(&result);
        event.channel_id = alyn_core::context::current_channel();
        if self.events_tx.send(event).await.is_err() {
            warn!(agent = agent_name, "agent event channel closed, completion dropped");
        }
        result
    }

    /// Fire-and-forget execution; used by `send_message_to_agent`.
    ///
    /// Spawned tasks do not inherit task locals, so the delivery channel
    /// is captured here and re-scoped inside the new task.
    pub fn spawn(self: &Arc<Self>, agent_name: String, instructions: String) {
        let dispatcher = self.clone();
        let channel = alyn_core::context::current_channel();
        tokio::spawn(alyn_core::context::with_channel(channel, async move {
            dispatcher.execute_agent(&agent_name, &instructions).await;
        }));
    }
}

#[async_trait]
impl AgentRunner for ExecutionDispatcher {
    async fn execute(&self, agent_name: &str, instructions: &str) -> ExecutionResult {
        self.execute_agent(agent_name, instructions).await
    }
}
