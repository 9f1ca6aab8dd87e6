//! Configuration management for discord-relay

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_core::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use relay_core::{GeminiConfig, HistoryLimits, RelaySettings};
use serde::Deserialize;

const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Source of environment variables.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub gemini: GeminiSection,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Channels the bot answers in. Empty means every channel.
    #[serde(default)]
    pub channel_ids: Vec<u64>,
}

#[derive(Clone, Deserialize)]
pub struct GeminiSection {
    /// Keys in priority order.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Request-path tunables. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub cooldown_ms: u64,
    pub max_message_length: usize,
    pub history_limit: usize,
    pub max_history_age_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub call_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5_000,
            max_message_length: 2_000,
            history_limit: 10,
            max_history_age_ms: 24 * 60 * 60 * 1_000,
            max_retries: 2,
            backoff_ms: 1_000,
            call_timeout_ms: 30_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"<REDACTED>")
            .field("channel_ids", &self.channel_ids)
            .finish()
    }
}

impl std::fmt::Debug for GeminiSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSection")
            .field("api_keys", &format!("<{} REDACTED>", self.api_keys.len()))
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env<E: ReadEnv>(env: &E) -> Result<Self> {
        let bot_token = env
            .var("DISCORD_BOT_TOKEN")
            .context("DISCORD_BOT_TOKEN not set")?;
        let api_keys = parse_key_list(
            &env.var("GOOGLE_GEMINI_API_KEY")
                .context("GOOGLE_GEMINI_API_KEY not set")?,
        );
        let channel_ids = parse_id_list(&env.var("DISCORD_CHANNEL_ID").unwrap_or_default())
            .context("Invalid value for DISCORD_CHANNEL_ID")?;

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            cooldown_ms: parse_var(env, "RELAY_COOLDOWN_MS", defaults.cooldown_ms)?,
            max_message_length: parse_var(
                env,
                "RELAY_MAX_MESSAGE_LENGTH",
                defaults.max_message_length,
            )?,
            history_limit: parse_var(env, "RELAY_HISTORY_LIMIT", defaults.history_limit)?,
            max_history_age_ms: parse_var(
                env,
                "RELAY_MAX_HISTORY_AGE_MS",
                defaults.max_history_age_ms,
            )?,
            max_retries: parse_var(env, "RELAY_MAX_RETRIES", defaults.max_retries)?,
            backoff_ms: parse_var(env, "RELAY_BACKOFF_MS", defaults.backoff_ms)?,
            call_timeout_ms: parse_var(env, "RELAY_CALL_TIMEOUT_MS", defaults.call_timeout_ms)?,
            sweep_interval_ms: parse_var(
                env,
                "RELAY_SWEEP_INTERVAL_MS",
                defaults.sweep_interval_ms,
            )?,
        };

        Ok(Config {
            discord: DiscordConfig {
                bot_token,
                channel_ids,
            },
            gemini: GeminiSection {
                api_keys,
                model: env.var("GEMINI_MODEL").unwrap_or_else(default_model),
                api_base: env.var("GEMINI_API_BASE").unwrap_or_else(default_api_base),
                system_prompt: env.var("SYSTEM_PROMPT").unwrap_or_default(),
                max_output_tokens: parse_var(
                    env,
                    "GEMINI_MAX_OUTPUT_TOKENS",
                    default_max_output_tokens(),
                )?,
                temperature: parse_var(env, "GEMINI_TEMPERATURE", default_temperature())?,
            },
            relay,
        })
    }

    /// Reject configurations the relay cannot serve with.
    pub fn validate(&self) -> Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            bail!("Discord bot token is empty");
        }
        if self.gemini.api_keys.iter().all(|k| k.trim().is_empty()) {
            bail!("no Gemini API keys configured");
        }
        if self.gemini.model.trim().is_empty() {
            bail!("Gemini model name is empty");
        }
        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            bail!(
                "temperature must be between 0 and 2, got {}",
                self.gemini.temperature
            );
        }

        let r = &self.relay;
        for (name, value) in [
            ("cooldown_ms", r.cooldown_ms),
            ("max_message_length", r.max_message_length as u64),
            ("history_limit", r.history_limit as u64),
            ("max_history_age_ms", r.max_history_age_ms),
            ("call_timeout_ms", r.call_timeout_ms),
            ("sweep_interval_ms", r.sweep_interval_ms),
        ] {
            if value == 0 {
                bail!("relay.{} must be greater than zero", name);
            }
        }
        if r.max_retries > MAX_RETRIES {
            bail!(
                "relay.max_retries must be at most {}, got {}",
                MAX_RETRIES,
                r.max_retries
            );
        }
        if r.backoff_ms > MAX_BACKOFF_MS {
            bail!(
                "relay.backoff_ms must be at most {}, got {}",
                MAX_BACKOFF_MS,
                r.backoff_ms
            );
        }
        if r.history_limit > 100 {
            bail!(
                "relay.history_limit must be at most 100, got {}",
                r.history_limit
            );
        }
        Ok(())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        let r = &self.relay;
        RelaySettings {
            cooldown: Duration::from_millis(r.cooldown_ms),
            max_message_length: r.max_message_length,
            history: HistoryLimits {
                max_count: r.history_limit,
                max_age: Duration::from_millis(r.max_history_age_ms),
                max_len_chars: r.max_message_length,
            },
            max_retries: r.max_retries,
            backoff: Duration::from_millis(r.backoff_ms),
            call_timeout: Duration::from_millis(r.call_timeout_ms),
            sweep_interval: Duration::from_millis(r.sweep_interval_ms),
            system_prompt: self.gemini.system_prompt.clone(),
            max_output_tokens: self.gemini.max_output_tokens,
            temperature: self.gemini.temperature,
        }
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_base: self.gemini.api_base.clone(),
            model: self.gemini.model.clone(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_output_tokens() -> u32 {
    1_000
}

fn default_temperature() -> f32 {
    0.7
}

fn parse_var<E: ReadEnv, T>(env: &E, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env.var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

/// Comma-separated keys, blanks dropped.
pub(crate) fn parse_key_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma-separated numeric ids, blanks dropped. Any other token is an error.
pub(crate) fn parse_id_list(s: &str) -> Result<Vec<u64>> {
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse::<u64>()
                .with_context(|| format!("Invalid channel id: {:?}", x))
        })
        .collect()
}
