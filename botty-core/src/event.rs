// ABOUTME: Inbound event model: an opaque JSON record tagged by its `type` field
// ABOUTME: Typed accessors for message fields and parsing of send acknowledgements

use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured record read from the transport.
///
/// Events are kept as raw JSON so handlers can look at fields the engine does not model.
/// Acknowledgements ("replies") have no `type` field but carry `reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a raw frame from the wire
    pub fn parse(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| BotError::Protocol(format!("invalid JSON frame: {}", e)))?;
        if !value.is_object() {
            return Err(BotError::Protocol(format!(
                "expected a JSON object, got: {}",
                frame
            )));
        }
        Ok(Self(value))
    }

    /// Build a plain message event, as a user typing into `channel` would produce
    pub fn message(channel: &str, user: &str, text: &str, ts: &str) -> Self {
        Self(serde_json::json!({
            "type": "message",
            "channel": channel,
            "user": user,
            "text": text,
            "ts": ts,
        }))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// The `type` tag (`message`, `hello`, `pong`, ...)
    pub fn kind(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn subtype(&self) -> Option<&str> {
        self.str_field("subtype")
    }

    pub fn channel(&self) -> Option<&str> {
        self.str_field("channel")
    }

    pub fn user(&self) -> Option<&str> {
        self.str_field("user")
    }

    pub fn text(&self) -> Option<&str> {
        self.str_field("text")
    }

    pub fn ts(&self) -> Option<&str> {
        self.str_field("ts")
    }

    /// A user-authored chat message: `type == "message"`, no subtype, with channel,
    /// user and text present
    pub fn is_user_message(&self) -> bool {
        self.kind() == Some("message")
            && self.subtype().is_none()
            && self.channel().is_some()
            && self.user().is_some()
            && self.text().is_some()
    }

    /// The correlation ID this event acknowledges, if it is an acknowledgement
    pub fn reply_to(&self) -> Option<u64> {
        self.0.get("reply_to").and_then(Value::as_u64)
    }

    /// Acknowledgements carry `reply_to` but no `type`; a `pong` echoing a ping ID does not count
    pub fn is_acknowledgement(&self) -> bool {
        self.reply_to().is_some() && self.kind().is_none()
    }

    /// Interpret this event as an acknowledgement. `None` for anything else.
    pub fn acknowledgement(&self) -> Option<Acknowledgement> {
        if !self.is_acknowledgement() {
            return None;
        }
        let reply_to = self.reply_to()?;
        let ok = self.0.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let error = self.0.get("error").map(|err| {
            err.get("msg")
                .and_then(Value::as_str)
                .or_else(|| err.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string())
        });
        Some(Acknowledgement {
            reply_to,
            ok,
            ts: self.ts().map(str::to_string),
            error,
        })
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server reply to an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub reply_to: u64,
    pub ok: bool,
    /// Server-assigned timestamp; the durable message identifier for reactions
    pub ts: Option<String>,
    /// Server-reported failure message when `ok` is false
    pub error: Option<String>,
}

impl Acknowledgement {
    /// Resolve this acknowledgement into the confirmed message timestamp
    pub fn into_timestamp(self) -> Result<String> {
        if !self.ok {
            return Err(BotError::SendRejected {
                message_id: self.reply_to,
                reason: self.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        match self.ts {
            Some(ts) if !ts.trim().is_empty() => Ok(ts),
            _ => Err(BotError::Protocol(format!(
                "acknowledgement for message {} has no timestamp",
                self.reply_to
            ))),
        }
    }
}
