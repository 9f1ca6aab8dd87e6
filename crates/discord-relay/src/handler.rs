//! Serenity event handler: filters gateway messages and hands mentions to
//! the orchestrator.

use std::sync::{Arc, OnceLock};

use anyhow::Context as _;
use relay_core::history::COMMAND_PREFIX;
use relay_core::{
    Clock, CompletionBackend, HistorySource, MentionEvent, Orchestrator, Outcome, RawMessage,
};
use serenity::async_trait;
use serenity::builder::{CreateMessage, GetMessages};
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, MessageId};
use serenity::prelude::*;
use tracing::{debug, error, info, warn};

use crate::health::AppState;

/// The parts of a gateway message the filter looks at.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub author_is_bot: bool,
    pub channel_id: u64,
    pub content: &'a str,
    pub mentions_bot: bool,
}

/// Decides which gateway messages reach the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct GatewayFilter {
    /// Empty allows every channel.
    channel_allowlist: Vec<u64>,
}

impl GatewayFilter {
    pub fn new(channel_allowlist: Vec<u64>) -> Self {
        Self { channel_allowlist }
    }

    pub fn check_channel_access(&self, channel_id: u64) -> bool {
        self.channel_allowlist.is_empty() || self.channel_allowlist.contains(&channel_id)
    }

    pub fn accepts(&self, msg: &Inbound<'_>) -> bool {
        !msg.author_is_bot
            && self.check_channel_access(msg.channel_id)
            && !msg.content.starts_with(COMMAND_PREFIX)
            && msg.mentions_bot
    }
}

/// Recent messages of one channel, read through the Discord REST API.
pub struct ChannelHistory {
    http: Arc<Http>,
    channel_id: ChannelId,
    /// Only messages older than this one are read.
    before: MessageId,
}

impl ChannelHistory {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, before: MessageId) -> Self {
        Self {
            http,
            channel_id,
            before,
        }
    }
}

impl HistorySource for ChannelHistory {
    async fn recent_messages(&self, limit: usize) -> anyhow::Result<Vec<RawMessage>> {
        let limit = u8::try_from(limit.min(100)).unwrap_or(100);
        let messages = self
            .channel_id
            .messages(&*self.http, GetMessages::new().before(self.before).limit(limit))
            .await
            .with_context(|| format!("Failed to fetch history of channel {}", self.channel_id))?;

        Ok(messages.iter().map(raw_message).collect())
    }
}

fn raw_message(msg: &Message) -> RawMessage {
    RawMessage {
        author_id: msg.author.id.get(),
        is_bot_author: msg.author.bot,
        content: msg.content.clone(),
        created_at_ms: msg.timestamp.unix_timestamp() * 1000,
    }
}

pub struct Handler<B: CompletionBackend, C: Clock> {
    relay: Arc<Orchestrator<B, C>>,
    filter: GatewayFilter,
    health: AppState,
    bot_id: OnceLock<u64>,
}

impl<B: CompletionBackend, C: Clock> Handler<B, C> {
    pub fn new(relay: Arc<Orchestrator<B, C>>, filter: GatewayFilter, health: AppState) -> Self {
        Self {
            relay,
            filter,
            health,
            bot_id: OnceLock::new(),
        }
    }

    async fn deliver(&self, ctx: &Context, msg: &Message, outcome: &Outcome) {
        let text = outcome.render();
        let result = if outcome.is_threaded_reply() {
            msg.reply(&ctx.http, text).await.map(|_| ())
        } else {
            msg.channel_id
                .send_message(&ctx.http, CreateMessage::new().content(text))
                .await
                .map(|_| ())
        };

        if let Err(e) = result {
            error!(channel_id = msg.channel_id.get(), "Failed to deliver response: {}", e);
        }
    }
}

#[async_trait]
impl<B: CompletionBackend, C: Clock> EventHandler for Handler<B, C> {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            "Discord bot connected as {}#{:04}",
            ready.user.name,
            ready.user.discriminator.map_or(0, |d| d.get())
        );
        if self.bot_id.set(ready.user.id.get()).is_err() {
            debug!("Bot id already recorded, ignoring reconnect");
        }
        self.health.set_bot_username(ready.user.name.clone()).await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(&bot_id) = self.bot_id.get() else {
            warn!("Message received before ready, ignoring");
            return;
        };

        let inbound = Inbound {
            author_is_bot: msg.author.bot,
            channel_id: msg.channel_id.get(),
            content: &msg.content,
            mentions_bot: msg.mentions.iter().any(|u| u.id.get() == bot_id),
        };
        if !self.filter.accepts(&inbound) {
            return;
        }

        let event = MentionEvent {
            author_id: msg.author.id.get(),
            channel_id: msg.channel_id.get(),
            content: msg.content.clone(),
        };
        debug!(
            user_id = event.author_id,
            channel_id = event.channel_id,
            "Handling mention"
        );

        let outcome = match self.relay.admit(&event, bot_id) {
            Err(refusal) => Outcome::Refusal(refusal),
            Ok(admitted) => {
                if let Err(e) = msg.channel_id.broadcast_typing(&ctx.http).await {
                    debug!("Failed to send typing indicator: {}", e);
                }
                let history = ChannelHistory::new(ctx.http.clone(), msg.channel_id, msg.id);
                self.relay.respond(&admitted, bot_id, &history).await
            }
        };

        self.deliver(&ctx, &msg, &outcome).await;
    }
}
