// ABOUTME: Scriptable in-memory transport for deterministic engine tests
// ABOUTME: Records outbound frames with timestamps and injects events, acks, and failures
//!
//! # Example
//!
//! ```no_run
//! use botty_core::testing::MockTransport;
//! use botty_core::{DirectoryEntry, DirectorySnapshot, Event};
//!
//! let mock = MockTransport::new()
//!     .with_directory(DirectorySnapshot::new(
//!         vec![DirectoryEntry::new("C1", "general")],
//!         vec![DirectoryEntry::new("U1", "alice")],
//!     ))
//!     .auto_acknowledge();
//!
//! // Keep a handle for assertions; the mock itself moves into the bot.
//! let handle = mock.clone();
//! handle.push_event(Event::message("C1", "U1", "poll start", "1.0"));
//! ```

use crate::directory::DirectorySnapshot;
use crate::error::{BotError, Result};
use crate::event::Event;
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// An outbound frame as the mock saw it
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub frame: Value,
    pub at: Instant,
}

/// A reaction add/remove request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCall {
    pub added: bool,
    pub channel_id: String,
    pub ts: String,
    pub emoji: String,
}

#[derive(Default)]
struct MockState {
    inbound: VecDeque<(Instant, Event)>,
    sent: Vec<SentFrame>,
    reactions: Vec<ReactionCall>,
    pings: usize,
    connects: usize,
    connected: bool,
    auto_ack: bool,
    next_ts: u64,
    dm_channels: HashMap<String, String>,
    connect_failures: VecDeque<BotError>,
    identify_failures: VecDeque<BotError>,
    read_failures: VecDeque<BotError>,
    read_panics: VecDeque<String>,
    send_failures: VecDeque<BotError>,
}

/// In-memory transport. Clones share state, so tests keep one clone for inspection.
#[derive(Clone)]
pub struct MockTransport {
    bot_id: String,
    directory: DirectorySnapshot,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            bot_id: "UBOT".to_string(),
            directory: DirectorySnapshot::default(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_bot_id(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = bot_id.into();
        self
    }

    pub fn with_directory(mut self, directory: DirectorySnapshot) -> Self {
        self.directory = directory;
        self
    }

    /// Answer every outbound message with a successful acknowledgement
    pub fn auto_acknowledge(self) -> Self {
        self.lock().auto_ack = true;
        self
    }

    pub fn with_direct_message(self, user_id: &str, channel_id: &str) -> Self {
        self.lock()
            .dm_channels
            .insert(user_id.to_string(), channel_id.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an inbound event, readable immediately
    pub fn push_event(&self, event: Event) {
        self.lock().inbound.push_back((Instant::now(), event));
    }

    /// Queue an inbound event that becomes readable after `delay`
    pub fn push_event_after(&self, delay: Duration, event: Event) {
        self.lock().inbound.push_back((Instant::now() + delay, event));
    }

    pub fn fail_next_connect(&self, err: BotError) {
        self.lock().connect_failures.push_back(err);
    }

    pub fn fail_next_identify(&self, err: BotError) {
        self.lock().identify_failures.push_back(err);
    }

    pub fn fail_next_read(&self, err: BotError) {
        self.lock().read_failures.push_back(err);
    }

    /// Make the next read panic with `message`, as a transport bug would
    pub fn panic_next_read(&self, message: impl Into<String>) {
        self.lock().read_panics.push_back(message.into());
    }

    pub fn fail_next_send(&self, err: BotError) {
        self.lock().send_failures.push_back(err);
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Text of every outbound chat message, in send order
    pub fn sent_texts(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter_map(|sent| sent.frame["text"].as_str().map(str::to_string))
            .collect()
    }

    pub fn reactions(&self) -> Vec<ReactionCall> {
        self.lock().reactions.clone()
    }

    pub fn ping_count(&self) -> usize {
        self.lock().pings
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn record_reaction(&self, added: bool, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        let method = if added { "reactions.add" } else { "reactions.remove" };
        if !self.directory.has_channel(channel_id) {
            return Err(BotError::Api {
                method: method.to_string(),
                reason: "channel_not_found".to_string(),
            });
        }
        self.lock().reactions.push(ReactionCall {
            added,
            channel_id: channel_id.to_string(),
            ts: ts.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connects += 1;
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.connected = true;
        Ok(())
    }

    async fn identify(&mut self) -> Result<String> {
        if let Some(err) = self.lock().identify_failures.pop_front() {
            return Err(err);
        }
        Ok(self.bot_id.clone())
    }

    fn read_events(&mut self) -> Result<Vec<Event>> {
        let mut state = self.lock();
        if let Some(err) = state.read_failures.pop_front() {
            state.connected = false;
            return Err(err);
        }
        if let Some(message) = state.read_panics.pop_front() {
            drop(state);
            panic!("{}", message);
        }
        let now = Instant::now();
        let mut ready = Vec::new();
        let mut waiting = VecDeque::new();
        for (due, event) in state.inbound.drain(..) {
            if due <= now {
                ready.push(event);
            } else {
                waiting.push_back((due, event));
            }
        }
        state.inbound = waiting;
        Ok(ready)
    }

    async fn send(&mut self, frame: Value) -> Result<()> {
        let mut state = self.lock();
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        let now = Instant::now();
        if state.auto_ack {
            if let Some(id) = frame["id"].as_u64() {
                state.next_ts += 1;
                let ack = Event::new(json!({
                    "ok": true,
                    "reply_to": id,
                    "ts": format!("1700000000.{:06}", state.next_ts),
                    "text": frame["text"].clone(),
                }));
                state.inbound.push_back((now, ack));
            }
        }
        state.sent.push(SentFrame { frame, at: now });
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.lock().pings += 1;
        Ok(())
    }

    fn directory(&self) -> &DirectorySnapshot {
        &self.directory
    }

    async fn add_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.record_reaction(true, channel_id, ts, emoji)
    }

    async fn remove_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.record_reaction(false, channel_id, ts, emoji)
    }

    async fn direct_message_channel(&mut self, user_id: &str) -> Result<Option<String>> {
        Ok(self.lock().dm_channels.get(user_id).cloned())
    }

    async fn disconnect(&mut self) {
        self.lock().connected = false;
    }
}
