// ABOUTME: Rate-limited outbound message sender with per-session correlation IDs
// ABOUTME: Enforces the platform's fixed minimum spacing between sends by waiting, not failing

use crate::directory::NameLookup;
use crate::error::{BotError, Result};
use crate::session::Session;
use crate::transport::Transport;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Process-wide send throttle
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_send: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_send: None,
        }
    }

    /// How long a send issued right now would have to wait
    pub fn remaining(&self) -> Duration {
        match self.last_send {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Wait out the remainder of the interval, then claim the slot
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<()> {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            tracing::debug!(wait_ms = remaining.as_millis() as u64, "Rate limiting send");
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = cancel.cancelled() => return Err(BotError::Cancelled),
            }
        }
        self.last_send = Some(Instant::now());
        Ok(())
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }
}

/// Validates, throttles and forwards outbound chat messages
#[derive(Debug)]
pub struct Sender {
    limiter: RateLimiter,
}

impl Sender {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            limiter: RateLimiter::new(min_interval),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Send `wire_text` to `channel_id` and return its correlation ID.
    ///
    /// Returns as soon as the transport accepts the frame; does not wait for the
    /// server's acknowledgement.
    pub async fn send<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        channel_id: &str,
        wire_text: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if !session.directory().has_channel(channel_id) {
            return Err(BotError::InvalidChannel(channel_id.to_string()));
        }
        if wire_text.is_empty() {
            return Err(BotError::InvalidArgument(
                "message text must not be empty".to_string(),
            ));
        }

        self.limiter.acquire(cancel).await?;

        let message_id = session.register_pending(channel_id, wire_text);
        let channel_name = session
            .directory()
            .channel_name(channel_id)
            .unwrap_or(channel_id)
            .to_string();
        tracing::info!(
            channel = %channel_name,
            message_id,
            text = %wire_text,
            "Sending message"
        );

        let frame = serde_json::json!({
            "id": message_id,
            "type": "message",
            "channel": channel_id,
            "text": wire_text,
        });
        if let Err(e) = session.send(frame).await {
            session.take_pending(message_id);
            return Err(e);
        }

        Ok(message_id)
    }
}
