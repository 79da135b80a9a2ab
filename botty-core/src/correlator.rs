// ABOUTME: Correlates outbound messages with their asynchronous server acknowledgements
// ABOUTME: Turns fire-and-forget sends into a blocking confirm-or-fail call with a deadline

use crate::error::{BotError, Result};
use crate::event::Acknowledgement;
use crate::sender::Sender;
use crate::session::Session;
use crate::transport::Transport;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polls the unprocessed event buffer for acknowledgements.
///
/// Only peeks: acknowledgements stay in the buffer so the dispatch loop still sees
/// every event in order.
#[derive(Debug, Clone)]
pub struct Correlator {
    poll_interval: Duration,
}

impl Correlator {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Send a message and wait until the server durably stores it.
    ///
    /// Returns the server-assigned timestamp, which identifies the message for
    /// reactions. On timeout the send is not rolled back; the message may still
    /// be delivered later.
    pub async fn send_and_confirm<T: Transport>(
        &self,
        session: &mut Session<T>,
        sender: &mut Sender,
        channel_id: &str,
        wire_text: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if timeout.is_zero() {
            return Err(BotError::InvalidArgument(
                "confirmation timeout must be positive".to_string(),
            ));
        }
        let message_id = sender.send(session, channel_id, wire_text, cancel).await?;
        let result = self.wait_for(session, message_id, timeout, cancel).await;
        let latency_ms = session
            .take_pending(message_id)
            .map(|pending| pending.latency_ms());

        match &result {
            Ok(ts) => tracing::debug!(message_id, ts = %ts, latency_ms, "Message confirmed"),
            Err(e) => tracing::warn!(message_id, error = %e, latency_ms, "Message not confirmed"),
        }
        result
    }

    /// Wait for the acknowledgement of `message_id`
    pub async fn wait_for<T: Transport>(
        &self,
        session: &mut Session<T>,
        message_id: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            session.pump()?;
            if let Some(ack) = find_acknowledgement(session, message_id) {
                return ack.into_timestamp();
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BotError::Timeout {
                    message_id,
                    timeout,
                });
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => return Err(BotError::Cancelled),
            }
        }
    }
}

fn find_acknowledgement<T: Transport>(
    session: &Session<T>,
    message_id: u64,
) -> Option<Acknowledgement> {
    session.buffer().peek_find(|event| {
        event
            .acknowledgement()
            .filter(|ack| ack.reply_to == message_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryEntry, DirectorySnapshot};
    use crate::event::Event;
    use crate::testing::MockTransport;
    use serde_json::json;

    async fn setup(mock: MockTransport) -> (Session<MockTransport>, Sender, Correlator) {
        let mock = mock.with_directory(DirectorySnapshot::new(
            vec![DirectoryEntry::new("C1", "general")],
            vec![],
        ));
        let mut session = Session::new(mock, Duration::from_secs(5));
        session.connect().await.unwrap();
        (
            session,
            Sender::new(Duration::from_secs(1)),
            Correlator::new(Duration::from_millis(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_send_returns_server_ts() {
        let mock = MockTransport::new().auto_acknowledge();
        let (mut session, mut sender, correlator) = setup(mock).await;
        let cancel = CancellationToken::new();

        let ts = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(2), &cancel)
            .await
            .unwrap();
        assert!(!ts.is_empty());
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_stays_in_buffer() {
        let mock = MockTransport::new().auto_acknowledge();
        let (mut session, mut sender, correlator) = setup(mock).await;
        let cancel = CancellationToken::new();

        correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(2), &cancel)
            .await
            .unwrap();

        let drained = session.buffer().drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].reply_to(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, mut sender, correlator) = setup(mock).await;
        handle.push_event(Event::new(json!({
            "ok": false,
            "reply_to": 1,
            "error": {"code": 2, "msg": "message text is missing"}
        })));
        let cancel = CancellationToken::new();

        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::SendRejected { message_id: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_no_acknowledgement() {
        let mock = MockTransport::new();
        let (mut session, mut sender, correlator) = setup(mock).await;
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Timeout { message_id: 1, .. }));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_acknowledgements_are_ignored() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, mut sender, correlator) = setup(mock).await;
        handle.push_event(Event::new(json!({"ok": true, "reply_to": 99, "ts": "1.1"})));
        let cancel = CancellationToken::new();

        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Timeout { .. }));
        // The unrelated acknowledgement is still waiting for the dispatch loop
        assert_eq!(session.buffer().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_acknowledgement_within_deadline() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, mut sender, correlator) = setup(mock).await;
        handle.push_event_after(
            Duration::from_millis(500),
            Event::new(json!({"ok": true, "reply_to": 1, "ts": "1700000000.000200"})),
        );
        let cancel = CancellationToken::new();

        let ts = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(ts, "1700000000.000200");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_acknowledgement() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, mut sender, correlator) = setup(mock).await;
        handle.push_event(Event::new(json!({"ok": true, "reply_to": 1})));
        let cancel = CancellationToken::new();

        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected_before_sending() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let (mut session, mut sender, correlator) = setup(mock).await;
        let cancel = CancellationToken::new();

        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidArgument(_)));
        assert!(handle.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_wait() {
        let mock = MockTransport::new();
        let (mut session, mut sender, correlator) = setup(mock).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = correlator
            .send_and_confirm(&mut session, &mut sender, "C1", "hi", Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
