// ABOUTME: Interactive console transport for running a bot without Slack
// ABOUTME: Lines typed on stdin arrive as #general messages; outbound messages are printed and acked locally

use async_trait::async_trait;
use botty_core::codec;
use botty_core::{
    BotError, DirectoryEntry, DirectorySnapshot, Event, EventBuffer, NameLookup, Result,
    Transport,
};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

pub const CONSOLE_CHANNEL_ID: &str = "C0001";
pub const CONSOLE_DM_CHANNEL_ID: &str = "D0001";
pub const CONSOLE_USER_ID: &str = "U0001";
pub const CONSOLE_BOT_ID: &str = "U0002";

const BOT_DISPLAY_NAME: &str = "Botty";

type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// Debug transport that talks to a terminal.
///
/// The workspace has one channel (`#general`), a direct-message channel with the
/// console user, and two users: `me` (whoever is typing) and `botty`.
pub struct ConsoleTransport {
    directory: DirectorySnapshot,
    inbound: EventBuffer,
    input: Option<Box<dyn BufRead + Send>>,
    output: SharedOutput,
    connected: bool,
}

impl ConsoleTransport {
    /// Console on the process's stdin and stdout
    pub fn new() -> Self {
        Self::with_io(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    pub fn with_io(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            directory: console_directory(),
            inbound: EventBuffer::new(),
            input: Some(input),
            output: Arc::new(Mutex::new(output)),
            connected: false,
        }
    }

    fn print_line(&self, line: &str) -> Result<()> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| BotError::Connection("console output lock poisoned".to_string()))?;
        writeln!(output, "{}", line)
            .and_then(|_| output.flush())
            .map_err(|e| BotError::Connection(format!("console write failed: {}", e)))
    }

    fn channel_label(&self, channel_id: &str) -> String {
        match self.directory.channel_name(channel_id) {
            Some(name) => format!("#{}", name),
            None => channel_id.to_string(),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn console_directory() -> DirectorySnapshot {
    DirectorySnapshot::new(
        vec![
            DirectoryEntry::new(CONSOLE_CHANNEL_ID, "general"),
            DirectoryEntry::new(CONSOLE_DM_CHANNEL_ID, CONSOLE_USER_ID),
        ],
        vec![
            DirectoryEntry::new(CONSOLE_USER_ID, "me").with_secondary_name("Console User"),
            DirectoryEntry::new(CONSOLE_BOT_ID, "botty").with_secondary_name(BOT_DISPLAY_NAME),
        ],
    )
}

/// Message timestamp in Slack's `seconds.micros` form
fn timestamp_now() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

fn spawn_stdin_reader(input: Box<dyn BufRead + Send>, inbound: EventBuffer) {
    std::thread::spawn(move || {
        for line in input.lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => inbound.push(Event::message(
                    CONSOLE_CHANNEL_ID,
                    CONSOLE_USER_ID,
                    &codec::escape(&line),
                    &timestamp_now(),
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "Console input failed");
                    break;
                }
            }
        }
        tracing::debug!("Console input closed");
    });
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn connect(&mut self) -> Result<()> {
        // Reconnects keep reading from the same input thread
        if let Some(input) = self.input.take() {
            spawn_stdin_reader(input, self.inbound.clone());
        }
        self.connected = true;
        self.inbound.push(Event::new(json!({"type": "hello"})));
        Ok(())
    }

    async fn identify(&mut self) -> Result<String> {
        Ok(CONSOLE_BOT_ID.to_string())
    }

    fn read_events(&mut self) -> Result<Vec<Event>> {
        if !self.connected {
            return Err(BotError::Connection("console is not connected".to_string()));
        }
        Ok(self.inbound.drain_all())
    }

    async fn send(&mut self, frame: Value) -> Result<()> {
        if !self.connected {
            return Err(BotError::Connection("console is not connected".to_string()));
        }
        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| BotError::Protocol(format!("outbound frame has no id: {}", frame)))?;
        let channel_id = frame.get("channel").and_then(Value::as_str).unwrap_or_default();
        let wire_text = frame.get("text").and_then(Value::as_str).unwrap_or_default();

        let text = codec::to_plain(wire_text, &self.directory).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Printing wire text as-is");
            wire_text.to_string()
        });
        self.print_line(&format!(
            "{} | {}: {}",
            self.channel_label(channel_id),
            BOT_DISPLAY_NAME,
            text
        ))?;

        self.inbound.push(Event::new(json!({
            "ok": true,
            "reply_to": id,
            "ts": timestamp_now(),
            "text": wire_text,
        })));
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn directory(&self) -> &DirectorySnapshot {
        &self.directory
    }

    async fn add_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.print_line(&format!(
            "{} | {} reacted :{}: to {}",
            self.channel_label(channel_id),
            BOT_DISPLAY_NAME,
            emoji,
            ts
        ))
    }

    async fn remove_reaction(&mut self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.print_line(&format!(
            "{} | {} removed :{}: from {}",
            self.channel_label(channel_id),
            BOT_DISPLAY_NAME,
            emoji,
            ts
        ))
    }

    async fn direct_message_channel(&mut self, user_id: &str) -> Result<Option<String>> {
        Ok((user_id == CONSOLE_USER_ID).then(|| CONSOLE_DM_CHANNEL_ID.to_string()))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
