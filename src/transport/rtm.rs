// ABOUTME: Live Slack real-time messaging transport over a websocket
// ABOUTME: rtm.connect handshake, background frame reader, directory kept current from stream events

use super::web_api::WebApi;
use async_trait::async_trait;
use botty_core::{
    BotError, DirectoryEntry, DirectorySnapshot, Event, Result, SlackConfig, Transport,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Conversation types loaded into the directory on connect
const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim,im";

/// What the reader task hands to the control task
#[derive(Debug)]
enum Inbound {
    Frame(String),
    Closed(String),
}

/// Slack RTM client.
///
/// A background task reads the websocket and forwards text frames over an
/// unbounded channel, so [`Transport::read_events`] only drains what already arrived.
pub struct RtmTransport {
    api: WebApi,
    directory: DirectorySnapshot,
    writer: Option<SplitSink<WsStream, Message>>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    reader: Option<JoinHandle<()>>,
    /// Close reason seen while events were still queued; reported on the next read
    closed: Option<String>,
}

impl RtmTransport {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        Ok(Self {
            api: WebApi::new(config)?,
            directory: DirectorySnapshot::default(),
            writer: None,
            inbound: None,
            reader: None,
            closed: None,
        })
    }

    async fn load_directory(&self) -> Result<DirectorySnapshot> {
        let channels = self
            .api
            .paginate(
                "conversations.list",
                &[("types", CONVERSATION_TYPES), ("exclude_archived", "true")],
                "channels",
            )
            .await?;
        let users = self.api.paginate("users.list", &[], "members").await?;

        Ok(DirectorySnapshot::new(
            channels.iter().filter_map(channel_entry).collect(),
            users.iter().filter_map(user_entry).collect(),
        ))
    }

    async fn send_frame(&mut self, frame: &Value) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BotError::Connection("RTM websocket is not connected".to_string()))?;
        writer
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| BotError::Connection(format!("websocket send failed: {}", e)))
    }
}

#[async_trait]
impl Transport for RtmTransport {
    async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let body = self
            .api
            .call("rtm.connect", &[])
            .await
            .map_err(|e| match e {
                BotError::Api { reason, .. } => {
                    BotError::Connection(format!("rtm.connect rejected: {}", reason))
                }
                other => other,
            })?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::Connection("rtm.connect returned no websocket URL".into()))?;

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BotError::Connection(format!("websocket handshake failed: {}", e)))?;

        self.directory = self.load_directory().await?;

        let (writer, reader) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(spawn_reader(reader, tx));
        self.writer = Some(writer);
        self.inbound = Some(rx);

        let team = body
            .pointer("/team/domain")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        tracing::info!(platform = "slack", team = %team, "RTM websocket connected");
        Ok(())
    }

    async fn identify(&mut self) -> Result<String> {
        let body = self.api.call("auth.test", &[]).await.map_err(|e| match e {
            BotError::Api { reason, .. } => BotError::Authentication(reason),
            other => other,
        })?;
        body.get("user_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BotError::Authentication("auth.test returned no user_id".to_string()))
    }

    fn read_events(&mut self) -> Result<Vec<Event>> {
        if let Some(reason) = self.closed.take() {
            return Err(BotError::Connection(reason));
        }
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| BotError::Connection("RTM websocket is not connected".to_string()))?;

        let mut events = Vec::new();
        loop {
            match inbound.try_recv() {
                Ok(Inbound::Frame(text)) => match Event::parse(&text) {
                    Ok(event) => {
                        apply_directory_event(&mut self.directory, &event);
                        events.push(event);
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping unparseable RTM frame"),
                },
                Ok(Inbound::Closed(reason)) => {
                    if events.is_empty() {
                        return Err(BotError::Connection(reason));
                    }
                    self.closed = Some(reason);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if events.is_empty() {
                        return Err(BotError::Connection("RTM reader stopped".to_string()));
                    }
                    break;
                }
            }
        }
        Ok(events)
    }

    async fn send(&mut self, frame: Value) -> Result<()> {
        self.send_frame(&frame).await
    }

    async fn ping(&mut self) -> Result<()> {
        // No id: Slack would echo it back as `reply_to` on the pong
        self.send_frame(&json!({"type": "ping"})).await
    }

    fn directory(&self) -> &DirectorySnapshot {
        &self.directory
    }

    async fn add_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.api
            .call(
                "reactions.add",
                &[("channel", channel_id), ("timestamp", ts), ("name", emoji)],
            )
            .await
            .map(|_| ())
    }

    async fn remove_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.api
            .call(
                "reactions.remove",
                &[("channel", channel_id), ("timestamp", ts), ("name", emoji)],
            )
            .await
            .map(|_| ())
    }

    async fn direct_message_channel(&mut self, user_id: &str) -> Result<Option<String>> {
        let ims = self
            .api
            .paginate("conversations.list", &[("types", "im")], "channels")
            .await?;
        let found = ims
            .iter()
            .filter(|im| im.get("user").and_then(Value::as_str) == Some(user_id))
            .find_map(channel_entry);

        Ok(found.map(|entry| {
            let id = entry.id.clone();
            self.directory.upsert_channel(entry);
            id
        }))
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, writer.close())
                .await
                .is_err()
            {
                tracing::debug!("Timed out closing RTM websocket");
            }
        }
        self.inbound = None;
        self.closed = None;
    }
}

fn spawn_reader(
    mut stream: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if tx.send(Inbound::Frame(text)).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!(
                            "websocket closed by server: {} {}",
                            u16::from(frame.code),
                            frame.reason
                        ),
                        None => "websocket closed by server".to_string(),
                    };
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of RTM
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("websocket read error: {}", e),
                None => break "websocket stream ended".to_string(),
            }
        };
        tracing::debug!(reason = %reason, "RTM reader stopped");
        let _ = tx.send(Inbound::Closed(reason));
    })
}

/// Directory entry for a conversation object. Direct-message channels are named
/// after the user on the other end.
fn channel_entry(channel: &Value) -> Option<DirectoryEntry> {
    let id = channel.get("id")?.as_str()?;
    let name = if channel.get("is_im").and_then(Value::as_bool) == Some(true) {
        channel.get("user")?.as_str()?
    } else {
        channel.get("name")?.as_str()?
    };
    Some(DirectoryEntry::new(id, name))
}

/// Directory entry for a user object, with the real name as secondary name
fn user_entry(user: &Value) -> Option<DirectoryEntry> {
    let id = user.get("id")?.as_str()?;
    let name = user.get("name")?.as_str()?;
    let entry = DirectoryEntry::new(id, name);

    let real_name = user
        .get("real_name")
        .or_else(|| user.pointer("/profile/real_name"))
        .and_then(Value::as_str)
        .filter(|real| !real.is_empty());
    Some(match real_name {
        Some(real) => entry.with_secondary_name(real),
        None => entry,
    })
}

/// Fold a directory-changing stream event into the snapshot
fn apply_directory_event(directory: &mut DirectorySnapshot, event: &Event) {
    match event.kind() {
        Some("channel_created" | "channel_rename" | "group_joined" | "group_rename") => {
            if let Some(entry) = event.get("channel").and_then(channel_entry) {
                tracing::debug!(channel = %entry.id, name = %entry.name, "Directory channel updated");
                directory.upsert_channel(entry);
            }
        }
        Some("im_created") => {
            // The embedded channel object omits the user; it sits on the event itself
            let channel_id = event
                .get("channel")
                .and_then(|channel| channel.get("id"))
                .and_then(Value::as_str);
            if let (Some(channel_id), Some(user_id)) = (channel_id, event.user()) {
                directory.upsert_channel(DirectoryEntry::new(channel_id, user_id));
            }
        }
        Some("team_join" | "user_change") => {
            if let Some(entry) = event.get("user").and_then(user_entry) {
                tracing::debug!(user = %entry.id, name = %entry.name, "Directory user updated");
                directory.upsert_user(entry);
            }
        }
        _ => {}
    }
}
