//! Discord ↔ Gemini relay
//!
//! Answers mentions in Discord channels with text generated by Gemini,
//! rotating across API keys when one runs out of quota or is rejected.

mod config;
mod handler;
mod health;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use relay_core::{CooldownTracker, GeminiBackend, KeyPool, Orchestrator, SystemClock};
use serenity::model::gateway::GatewayIntents;
use serenity::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{parse_id_list, parse_key_list, Config, SystemEnv};
use crate::handler::{GatewayFilter, Handler};
use crate::health::AppState;

/// Discord relay CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/discord-relay.toml")]
    config: String,

    /// Discord bot token (overrides config file)
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Comma-separated Gemini API keys (overrides config file)
    #[arg(long, env = "GOOGLE_GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_keys: Option<String>,

    /// Comma-separated channel ids to answer in (overrides config file)
    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    channel_ids: Option<String>,

    /// Health check server port
    #[arg(long, env = "HEALTH_CHECK_PORT", default_value = "3001")]
    health_port: u16,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(token) = &self.bot_token {
            config.discord.bot_token = token.clone();
        }
        if let Some(keys) = &self.gemini_api_keys {
            config.gemini.api_keys = parse_key_list(keys);
        }
        if let Some(ids) = &self.channel_ids {
            config.discord.channel_ids =
                parse_id_list(ids).context("Invalid value for --channel-ids")?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discord_relay=debug,relay_core=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Discord relay");

    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        info!("Loading config from file: {}", args.config);
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, loading from environment");
        Config::from_env(&SystemEnv)?
    };
    args.apply_overrides(&mut config)?;
    config.validate().context("Invalid configuration")?;

    if config.discord.channel_ids.is_empty() {
        warn!("No channel ids configured, the bot will answer in every channel it can read");
    }

    let settings = config.relay_settings();
    info!(
        model = %config.gemini.model,
        keys = config.gemini.api_keys.len(),
        cooldown_ms = settings.cooldown.as_millis() as u64,
        "Relay configured"
    );

    // Probe keys before connecting to the gateway
    let backend = GeminiBackend::new(config.gemini_config());
    let pool = Arc::new(KeyPool::new(backend, config.gemini.api_keys.clone())?);
    let active = pool
        .activate_first_healthy()
        .await
        .context("Cannot start without a working Gemini API key")?;
    info!("Using Gemini API key #{} of {}", active + 1, pool.key_count());

    let cooldowns = Arc::new(CooldownTracker::new(settings.cooldown));
    let sweeper = cooldowns.start_sweeper(settings.sweep_interval, SystemClock);

    let health_state = AppState::new(pool.clone(), cooldowns.clone());
    let relay = Arc::new(Orchestrator::new(pool, cooldowns, SystemClock, settings));

    // Start health check server
    let health_port = args.health_port;
    let health_state_clone = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = health::start_health_server(health_state_clone, health_port).await {
            error!("Health server error: {}", e);
        }
    });

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler::new(
        relay,
        GatewayFilter::new(config.discord.channel_ids.clone()),
        health_state,
    );

    let mut client = Client::builder(&config.discord.bot_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Discord client: {}", e))?;

    // Graceful shutdown: close all shards on SIGTERM or Ctrl+C.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping Discord client...");
        shard_manager.shutdown_all().await;
    });

    info!("Starting Discord gateway connection...");

    // Blocks until all shards are stopped
    client
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Discord client error: {}", e))?;

    sweeper.abort();
    info!("Discord relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str("[discord]\nchannel_ids = [1]\n\n[gemini]\n").unwrap()
    }

    #[test]
    fn test_overrides_replace_channel_ids() {
        let args = Args::parse_from(["discord-relay", "--channel-ids", "10, 20"]);
        let mut config = base_config();
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config.discord.channel_ids, vec![10, 20]);
    }

    #[test]
    fn test_overrides_reject_non_numeric_channel_id() {
        let args = Args::parse_from(["discord-relay", "--channel-ids", "general-chat"]);
        let mut config = base_config();
        let err = args.apply_overrides(&mut config).unwrap_err();
        assert!(format!("{:#}", err).contains("general-chat"));
        assert_eq!(config.discord.channel_ids, vec![1]);
    }
}
