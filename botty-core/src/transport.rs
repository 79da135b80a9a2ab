// ABOUTME: Capability trait for the realtime chat transport
// ABOUTME: Implemented by the live Slack RTM client, the console debug client, and test mocks

use crate::directory::DirectorySnapshot;
use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use serde_json::Value;

/// The boundary between the engine and the chat platform.
///
/// The engine drives a transport from a single control task and never calls two
/// methods concurrently. Implementations buffer inbound frames themselves so that
/// [`Transport::read_events`] can return immediately.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Establish the realtime link. Fails with `BotError::Connection` if the
    /// handshake is rejected or the network is unreachable.
    async fn connect(&mut self) -> Result<()>;

    /// Identity handshake; returns the bot's own user ID.
    /// Fails with `BotError::Authentication` if the platform rejects the credential.
    async fn identify(&mut self) -> Result<String>;

    /// Drain every event received since the last call, in arrival order.
    /// Never waits for new data.
    fn read_events(&mut self) -> Result<Vec<Event>>;

    /// Hand a fully formed outbound frame (already carrying its `id`) to the wire
    async fn send(&mut self, frame: Value) -> Result<()>;

    /// Lightweight liveness ping
    async fn ping(&mut self) -> Result<()>;

    /// The latest channel/user snapshot the transport knows about
    fn directory(&self) -> &DirectorySnapshot;

    async fn add_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()>;

    async fn remove_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()>;

    /// ID of the direct-message channel with `user_id`, if one exists
    async fn direct_message_channel(&mut self, user_id: &str) -> Result<Option<String>>;

    /// Tear down the link. Safe to call when not connected.
    async fn disconnect(&mut self) {}
}
