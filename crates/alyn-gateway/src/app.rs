//! Composition root: builds every service from config, injects the
//! handles, and runs the server plus background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::info;

use alyn_agents::interaction::tools::InteractionTools;
use alyn_agents::{
    AgentJournal, AgentRoster, ExecutionDispatcher, InteractionRuntime, LessonStore,
    OpenRouterClient, ProfileStore,
};
use alyn_conversation::{ConversationLog, DuplicateDetector};
use alyn_core::outbound::{NullTransport, OutboundTransport};
use alyn_core::types::AgentEvent;
use alyn_core::AlynConfig;
use alyn_telegram::{TelegramApi, TelegramTransport};
use alyn_triggers::{AgentRunner, TriggerScheduler, TriggerStore};

/// Shared handles for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub interaction: Arc<InteractionRuntime>,
    pub log: Arc<ConversationLog>,
    pub triggers: Arc<TriggerStore>,
    pub outbound: Arc<dyn OutboundTransport>,
    pub telegram: Option<Arc<TelegramApi>>,
}

pub struct BuiltApp {
    pub state: AppState,
    pub scheduler: Arc<TriggerScheduler>,
    pub events_rx: mpsc::Receiver<AgentEvent>,
}

/// Wire every component. Pure construction; nothing is spawned here.
pub fn build(config: &AlynConfig) -> anyhow::Result<BuiltApp> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)?;
    let tz = config.user_timezone();

    let log = Arc::new(ConversationLog::new(
        data_dir.join("conversation").join("alyn.log"),
        tz,
    ));
    let roster = Arc::new(AgentRoster::new(
        data_dir.join("execution_agents").join("roster.json"),
    ));
    let journal = Arc::new(AgentJournal::new(data_dir.join("execution_agents"), tz));
    let triggers = Arc::new(TriggerStore::open(&data_dir.join("triggers.db"))?);
    let lessons = Arc::new(LessonStore::open(&data_dir.join("lessons.db"))?);
    let profile = Arc::new(ProfileStore::new(data_dir.join("profile.json")));

    let client = Arc::new(OpenRouterClient::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
    ));

    let outbound: Arc<dyn OutboundTransport> = match &config.telegram.bot_token {
        Some(token) => Arc::new(TelegramTransport::new(token)),
        None => {
            info!("no Telegram bot token configured, outbound delivery disabled");
            Arc::new(NullTransport)
        }
    };
    let telegram = config
        .telegram
        .bot_token
        .as_deref()
        .map(|token| Arc::new(TelegramApi::new(token)));

    let (events_tx, events_rx) = mpsc::channel(64);
    let dispatcher = ExecutionDispatcher::new(
        client.clone(),
        journal.clone(),
        triggers.clone(),
        config.llm.execution_model.clone(),
        config.llm.max_tokens,
        config.user.timezone.clone(),
        events_tx,
    );

    // The execution tool catalog shown in the interaction prompt; bound to
    // a placeholder agent since only names and descriptions are read.
    let catalog = alyn_agents::tools::ToolRegistry::new(
        alyn_agents::tools::triggers::build_trigger_tools(
            triggers.clone(),
            "catalog",
            &config.user.timezone,
        ),
    )
    .catalog();

    let tools = InteractionTools::new(
        log.clone(),
        roster.clone(),
        journal,
        dispatcher.clone(),
        outbound.clone(),
        lessons.clone(),
    );

    let interaction = Arc::new(InteractionRuntime::new(
        client,
        config.llm.interaction_model.clone(),
        config.llm.max_tokens,
        log.clone(),
        roster,
        DuplicateDetector::new(
            config.dedup.cache_size,
            Duration::from_secs(config.dedup.window_secs),
        ),
        tools,
        lessons,
        profile,
        catalog,
    ));

    let scheduler = TriggerScheduler::new(
        triggers.clone(),
        dispatcher as Arc<dyn AgentRunner>,
        Duration::from_secs(config.scheduler.poll_interval_secs),
    );

    Ok(BuiltApp {
        state: AppState {
            interaction,
            log,
            triggers,
            outbound,
            telegram,
        },
        scheduler,
        events_rx,
    })
}

/// Build, spawn the background tasks, and serve until ctrl-c.
pub async fn run(config: AlynConfig) -> anyhow::Result<()> {
    let built = build(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_task = tokio::spawn(built.scheduler.run(shutdown_rx));
    let pump_task = tokio::spawn(crate::events::run_event_pump(
        built.events_rx,
        built.state.interaction.clone(),
    ));

    let router = crate::http::router(built.state);
    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "alyn gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the poll loop; in-flight executions finish on their own tasks.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    pump_task.abort();
    Ok(())
}
