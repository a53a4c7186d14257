mod attachments;
mod config;
mod credentials;
mod error;
mod live;
mod message;
mod metadata;
mod pipeline;
mod platform;
mod sinks;
mod store;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::attachments::AttachmentStager;
use crate::config::{Config, TelegramConfig};
use crate::live::LiveBroadcaster;
use crate::pipeline::Pipeline;
use crate::platform::telegram::{self, TelegramMedia};
use crate::sinks::Dispatcher;
use crate::store::MessageStore;
use crate::web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatkeeper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Tracked chats: {}", match config.chat_list().len() {
        0 => "all".to_string(),
        n => n.to_string(),
    });
    info!("  File storage: {}", config.file_storage_path.display());
    info!("  Database: {}", config.database.path.display());

    let store = MessageStore::open(&config.database.path)?;
    store.migrate().await?;

    let config = Arc::new(config);
    let live = Arc::new(LiveBroadcaster::new(&config.file_storage_path));
    let web_state = AppState {
        config: Arc::clone(&config),
        store,
        live: Arc::clone(&live),
    };
    let bind = config.server.bind.clone();

    let Some((telegram_config, dispatcher)) =
        start_dispatcher(&config, web_state.store.clone()).await
    else {
        warn!("No [telegram] section configured; serving the HTTP API only");
        return web::serve(web_state, &bind).await;
    };

    let bot = teloxide::Bot::new(&telegram_config.bot_token);
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&config),
        Arc::new(dispatcher),
        AttachmentStager::new(&config.file_storage_path),
        live,
        Arc::new(TelegramMedia::new(bot.clone())),
    ));

    info!("Tracker is starting...");
    tokio::select! {
        result = web::serve(web_state, &bind) => result?,
        result = telegram::run(bot, pipeline) => result?,
    }

    Ok(())
}

/// Initialize the sinks, but only when there is an inbound platform to feed
/// them. Sink startup can block on interactive consent.
async fn start_dispatcher(
    config: &Config,
    store: MessageStore,
) -> Option<(TelegramConfig, Dispatcher)> {
    let telegram = config.telegram.clone()?;
    let sinks = sinks::build_sinks(config, store);
    Some((telegram, Dispatcher::start(config, sinks).await))
}
