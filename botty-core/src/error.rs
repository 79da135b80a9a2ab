// ABOUTME: Error taxonomy shared by every layer of the bot engine
// ABOUTME: Distinguishes retryable connection faults, caller mistakes, and user cancellation

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the engine
pub type Result<T, E = BotError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BotError {
    /// Realtime handshake or network failure; the outer loop retries after a backoff
    #[error("could not connect to the realtime messaging API: {0}")]
    Connection(String),

    /// Identity handshake (auth.test) reported failure
    #[error("identity handshake rejected: {0}")]
    Authentication(String),

    #[error("`{0}` is not a known channel ID")]
    InvalidChannel(String),

    #[error("`{0}` is not a known user ID")]
    InvalidUser(String),

    /// Caller passed an argument that can never succeed (empty text, zero timeout)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server acknowledged the message with `ok: false`
    #[error("message {message_id} rejected by server: {reason}")]
    SendRejected { message_id: u64, reason: String },

    /// No acknowledgement arrived in time. The message may still be delivered.
    #[error("no acknowledgement for message {message_id} within {timeout:?}")]
    Timeout { message_id: u64, timeout: Duration },

    /// The transport produced an event that violates the protocol contract
    #[error("malformed event from transport: {0}")]
    Protocol(String),

    /// Wire text contains unescaped markup outside a recognized reference
    #[error("malformed wire text: {0}")]
    Format(String),

    /// A Web API request (reactions, lookups) returned `ok: false`
    #[error("API call `{method}` failed: {reason}")]
    Api { method: String, reason: String },

    /// User interrupt. Never swallowed by any layer.
    #[error("operation cancelled")]
    Cancelled,
}

impl BotError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BotError::Cancelled)
    }

    /// Whether the dispatch loop should tear down the session and reconnect
    pub fn is_retryable(&self) -> bool {
        !self.is_cancellation()
    }
}

/// Check whether an arbitrary hook error is (or wraps) a user cancellation
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<BotError>()
            .is_some_and(BotError::is_cancellation)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cancellation_is_not_retryable() {
        assert!(!BotError::Cancelled.is_retryable());
        assert!(BotError::Connection("down".into()).is_retryable());
        assert!(BotError::Authentication("invalid_auth".into()).is_retryable());
    }

    #[test]
    fn test_is_cancellation_through_context() {
        let err: anyhow::Error = Err::<(), _>(BotError::Cancelled)
            .context("while waiting for poll results")
            .unwrap_err();
        assert!(is_cancellation(&err));

        let other = anyhow::anyhow!("division by zero");
        assert!(!is_cancellation(&other));
    }

    #[test]
    fn test_send_rejected_message() {
        let err = BotError::SendRejected {
            message_id: 7,
            reason: "channel_not_found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "message 7 rejected by server: channel_not_found"
        );
    }
}
