mod config;
mod dispatch;
mod markup;
mod platform;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::MessageDispatcher;
use crate::platform::signal::SignalCli;
use crate::platform::web::WebHub;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,supportbot=debug".into()),
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
    info!("  Parse mode: {}", config.telegram.parse_mode);
    info!("  Staff chat: {}", config.telegram.staffchat_id);
    info!("  Web chat: {}", config.web.listen);

    let (settings_tx, settings_rx) = watch::channel(config.settings());
    let bot = Bot::new(&config.telegram.bot_token);
    let hub = WebHub::new();

    let dispatcher = Arc::new(MessageDispatcher::new(
        settings_rx,
        Arc::new(bot.clone()),
        Arc::new(hub.clone()),
        Arc::new(SignalCli::new(config.signal.clone())),
    ));

    let web = {
        let router = platform::web::router(hub, dispatcher.clone());
        let listen = config.web.listen;
        tokio::spawn(async move {
            if let Err(e) = platform::web::serve(listen, router).await {
                error!("Web chat stopped: {:#}", e);
            }
        })
    };

    info!("Bot is starting...");
    platform::telegram::run(bot, dispatcher, Arc::new(settings_tx)).await?;

    web.abort();
    Ok(())
}
