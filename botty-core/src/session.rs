// ABOUTME: Session owns the realtime connection lifecycle and the unprocessed event buffer
// ABOUTME: Tracks connection state, bot identity, keepalive cadence, and per-session message IDs

use crate::buffer::EventBuffer;
use crate::directory::DirectorySnapshot;
use crate::error::{BotError, Result};
use crate::event::Event;
use crate::transport::Transport;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A message handed to the transport whose acknowledgement has not been seen yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: u64,
    pub channel_id: String,
    pub text: String,
    pub sent_at: Instant,
}

impl PendingMessage {
    /// Milliseconds since the message was handed to the transport
    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// One live connection to the platform.
///
/// Message IDs restart at 1 whenever the session is reset, since the server only
/// requires them to be unique per connection.
pub struct Session<T: Transport> {
    transport: T,
    state: SessionState,
    bot_id: Option<String>,
    last_ping: Instant,
    keepalive_interval: Duration,
    buffer: EventBuffer,
    next_message_id: u64,
    pending: HashMap<u64, PendingMessage>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, keepalive_interval: Duration) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            bot_id: None,
            last_ping: Instant::now(),
            keepalive_interval,
            buffer: EventBuffer::new(),
            next_message_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Connect and perform the identity handshake
    pub async fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        tracing::info!("Connecting to realtime messaging API");

        if let Err(e) = self.transport.connect().await {
            self.state = SessionState::Disconnected;
            return Err(e);
        }

        let bot_id = match self.transport.identify().await {
            Ok(id) => id,
            Err(e) => {
                self.transport.disconnect().await;
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        tracing::info!(bot_id = %bot_id, "Connected to realtime messaging API");
        self.bot_id = Some(bot_id);
        self.last_ping = Instant::now();
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Drop the connection and forget everything tied to it
    pub async fn reset(&mut self) {
        self.transport.disconnect().await;
        self.state = SessionState::Disconnected;
        self.bot_id = None;
        self.buffer.clear();
        self.pending.clear();
        self.next_message_id = 1;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The bot's own user ID, known once connected
    pub fn bot_id(&self) -> Option<&str> {
        self.bot_id.as_deref()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BotError::Connection("session is not connected".to_string()))
        }
    }

    /// Non-blocking read of whatever the transport has buffered
    pub fn read_events(&mut self) -> Result<Vec<Event>> {
        self.ensure_connected()?;
        self.transport.read_events()
    }

    /// Move freshly received transport events into the unprocessed buffer
    pub fn pump(&mut self) -> Result<()> {
        let fresh = self.read_events()?;
        self.buffer.extend(fresh);
        Ok(())
    }

    /// Hand a fully formed frame to the transport. No rate limiting, no retries.
    pub async fn send(&mut self, frame: Value) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(frame).await
    }

    /// Whether the keepalive interval has elapsed since the last ping
    pub fn keepalive_due(&self) -> bool {
        self.is_connected() && self.last_ping.elapsed() > self.keepalive_interval
    }

    pub async fn keep_alive(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.transport.ping().await?;
        self.last_ping = Instant::now();
        tracing::trace!("Sent keepalive ping");
        Ok(())
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    pub fn directory(&self) -> &DirectorySnapshot {
        self.transport.directory()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Allocate the next correlation ID and record the message as pending
    pub(crate) fn register_pending(&mut self, channel_id: &str, text: &str) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.pending.insert(
            id,
            PendingMessage {
                id,
                channel_id: channel_id.to_string(),
                text: text.to_string(),
                sent_at: Instant::now(),
            },
        );
        id
    }

    /// Forget a pending message (acknowledged, timed out, or never handed off)
    pub(crate) fn take_pending(&mut self, id: u64) -> Option<PendingMessage> {
        self.pending.remove(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
