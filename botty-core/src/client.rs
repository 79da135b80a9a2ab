// ABOUTME: The API surface handlers use to talk back to the platform
// ABOUTME: Bundles session, rate-limited sender and correlator behind send/respond/react/lookups

use crate::codec;
use crate::config::TimingConfig;
use crate::correlator::Correlator;
use crate::directory::{DirectorySnapshot, NameLookup};
use crate::error::{BotError, Result};
use crate::event::Event;
use crate::sender::Sender;
use crate::session::Session;
use crate::transport::Transport;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a handler may do while the dispatch loop is running.
///
/// All methods run on the dispatch loop's control task. Blocking operations
/// (rate-limit waits, confirmation polling) observe the bot's cancellation token.
pub struct Client<T: Transport> {
    session: Session<T>,
    sender: Sender,
    correlator: Correlator,
    timing: TimingConfig,
    cancel: CancellationToken,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, timing: TimingConfig, cancel: CancellationToken) -> Self {
        Self {
            session: Session::new(transport, timing.keepalive_interval()),
            sender: Sender::new(timing.send_interval()),
            correlator: Correlator::new(timing.confirm_poll()),
            timing,
            cancel,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.session.bot_id()
    }

    /// Fire-and-forget send of wire text. Returns the correlation ID.
    pub async fn send(&mut self, channel_id: &str, wire_text: &str) -> Result<u64> {
        self.sender
            .send(&mut self.session, channel_id, wire_text, &self.cancel)
            .await
    }

    /// Send plain text, escaping it for the wire first
    pub async fn say(&mut self, channel_id: &str, text: &str) -> Result<u64> {
        self.send(channel_id, &codec::escape(text)).await
    }

    /// Reply with wire text in the channel `event` came from
    pub async fn respond(&mut self, event: &Event, wire_text: &str) -> Result<u64> {
        let channel_id = reply_channel(event)?;
        self.send(&channel_id, wire_text).await
    }

    /// [`Client::respond`] for plain text, escaping it for the wire first
    pub async fn respond_plain(&mut self, event: &Event, text: &str) -> Result<u64> {
        self.respond(event, &codec::escape(text)).await
    }

    /// Send and block until the server confirms, returning the message timestamp
    pub async fn send_and_confirm(
        &mut self,
        channel_id: &str,
        wire_text: &str,
        timeout: Duration,
    ) -> Result<String> {
        self.correlator
            .send_and_confirm(
                &mut self.session,
                &mut self.sender,
                channel_id,
                wire_text,
                timeout,
                &self.cancel,
            )
            .await
    }

    /// [`Client::send_and_confirm`] with the configured default timeout
    pub async fn say_and_confirm(&mut self, channel_id: &str, text: &str) -> Result<String> {
        let timeout = self.timing.confirm_timeout();
        self.send_and_confirm(channel_id, &codec::escape(text), timeout)
            .await
    }

    /// Add `emoji` (without colons) to the message at `ts` in `channel_id`
    pub async fn react(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.check_reaction_target(channel_id, ts)?;
        self.session
            .transport_mut()
            .add_reaction(channel_id, ts, emoji)
            .await
    }

    pub async fn unreact(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.check_reaction_target(channel_id, ts)?;
        self.session
            .transport_mut()
            .remove_reaction(channel_id, ts, emoji)
            .await
    }

    fn check_reaction_target(&self, channel_id: &str, ts: &str) -> Result<()> {
        if !self.directory().has_channel(channel_id) {
            return Err(BotError::InvalidChannel(channel_id.to_string()));
        }
        if ts.trim().is_empty() {
            return Err(BotError::InvalidArgument(
                "reaction target needs a message timestamp".to_string(),
            ));
        }
        Ok(())
    }

    pub fn directory(&self) -> &DirectorySnapshot {
        self.session.directory()
    }

    pub fn channel_name(&self, channel_id: &str) -> Option<&str> {
        self.directory().channel_name(channel_id)
    }

    pub fn channel_id(&self, channel_name: &str) -> Option<String> {
        self.directory().channel_id(channel_name)
    }

    pub fn user_name(&self, user_id: &str) -> Option<&str> {
        self.directory().user_name(user_id)
    }

    pub fn user_id(&self, user_name: &str) -> Option<String> {
        self.directory().user_id(user_name)
    }

    /// Channel ID of the direct conversation with `user_id`.
    ///
    /// Fails with [`BotError::InvalidUser`] for IDs the directory does not know.
    pub async fn direct_message_channel(&mut self, user_id: &str) -> Result<Option<String>> {
        if self.directory().user(user_id).is_none() {
            return Err(BotError::InvalidUser(user_id.to_string()));
        }
        self.session
            .transport_mut()
            .direct_message_channel(user_id)
            .await
    }

    /// Convert wire text to plain text using the current directory
    pub fn to_plain(&self, wire_text: &str) -> Result<String> {
        codec::to_plain(wire_text, self.directory())
    }

    /// Plain-text body of a user message, or `None` for anything else
    pub fn message_text(&self, event: &Event) -> Result<Option<String>> {
        if !event.is_user_message() {
            return Ok(None);
        }
        match event.text() {
            Some(text) => self.to_plain(text).map(Some),
            None => Ok(None),
        }
    }

    /// Retire the pending entry for an acknowledgement passing through the dispatch loop
    pub(crate) fn settle(&mut self, event: &Event) {
        let Some(ack) = event.acknowledgement() else {
            return;
        };
        let Some(pending) = self.session.take_pending(ack.reply_to) else {
            return;
        };
        if ack.ok {
            tracing::debug!(
                message_id = ack.reply_to,
                channel = %pending.channel_id,
                latency_ms = pending.latency_ms(),
                "Message acknowledged"
            );
        } else {
            tracing::warn!(
                message_id = ack.reply_to,
                channel = %pending.channel_id,
                text = %pending.text,
                error = ack.error.as_deref().unwrap_or("unknown error"),
                "Message rejected by server"
            );
        }
    }
}

fn reply_channel(event: &Event) -> Result<String> {
    event
        .channel()
        .map(str::to_string)
        .ok_or_else(|| BotError::Protocol(format!("event has no channel to reply to: {}", event)))
}
