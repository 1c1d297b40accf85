// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Decision engine (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite store)
// - `discord/` = Discord-specific adapters (events, actuator)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Run the rotation and member sweep workers, shut everything down on Ctrl+C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::member_sweep::run_member_sweep_worker;
use crate::core::moderation::moderation_service::ModerationService;
use crate::core::moderation::salt_rotation::run_rotation_worker;
use crate::core::moderation::ModerationConfig;
use crate::discord::moderation::events as moderation_events;
use crate::discord::moderation::SerenityActuator;
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModerationStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::watch;

/// Event handler for Discord gateway events.
/// Errors are logged and the event is dropped; nothing is retried.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = moderation_events::handle_message(ctx, data, new_message).await {
                tracing::error!("Error handling message: {}", e);
            }
        }
        serenity::FullEvent::MessageUpdate { event, .. } => {
            if let Err(e) = moderation_events::handle_message_update(ctx, data, event).await {
                tracing::error!("Error handling message update: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = moderation_events::handle_member_join(ctx, data, new_member).await {
                tracing::error!("Error handling member join: {}", e);
            }
        }
        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening. RUST_LOG overrides the default.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;
    let config = ModerationConfig::from_env().context("Invalid moderation configuration")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = SqliteModerationStore::new(&config.database_path)
        .await
        .context("Failed to initialize SQLite store")?;

    let moderation = Arc::new(
        ModerationService::new(store, config)
            .await
            .context("Failed to initialize moderation service")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let sweep_rx = shutdown_rx.clone();
    let rotation_worker = tokio::spawn(run_rotation_worker(Arc::clone(&moderation), shutdown_rx));

    let data = Data {
        moderation: Arc::clone(&moderation),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Administration happens over DMs, so there are no slash commands to register.

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, ready, _framework| {
            Box::pin(async move {
                tracing::info!(bot = %ready.user.name, "Moderation bot is ready");

                // The sweep needs the HTTP client, which only exists once connected.
                tokio::spawn(run_member_sweep_worker(
                    Arc::clone(&data.moderation),
                    Arc::new(SerenityActuator::new(ctx.http.clone())),
                    sweep_rx,
                ));

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    let shard_manager = client.shard_manager.clone();
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = signal_tx.send(true);
        shard_manager.shutdown_all().await;
    });

    let result = client.start().await;

    // The gateway is gone either way; stop the workers before exiting.
    // Warning deletions still waiting on their TTL are dropped here.
    let _ = shutdown_tx.send(true);
    if let Err(e) = rotation_worker.await {
        tracing::warn!("Rotation worker ended abnormally: {}", e);
    }

    result.context("Error running bot")?;
    Ok(())
}
