// ABOUTME: Tests for the dispatch loop: hook isolation, event ordering, keepalive, reconnects
// ABOUTME: Uses the in-memory MockTransport on paused tokio time for deterministic timing

use anyhow::anyhow;
use async_trait::async_trait;
use botty_core::testing::MockTransport;
use botty_core::{
    Bot, BotError, Client, DirectoryEntry, DirectorySnapshot, Event, Handler, TimingConfig,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn directory() -> DirectorySnapshot {
    DirectorySnapshot::new(
        vec![DirectoryEntry::new("C1", "general")],
        vec![DirectoryEntry::new("U1", "alice")],
    )
}

/// Records the text of every event it sees and answers "poll start"
#[derive(Clone, Default)]
struct PollHandler {
    seen: Arc<Mutex<Vec<String>>>,
    acks: Arc<Mutex<Vec<u64>>>,
    poll_starts: Arc<Mutex<usize>>,
    steps: Arc<Mutex<usize>>,
}

#[async_trait]
impl Handler<MockTransport> for PollHandler {
    async fn on_step(&mut self, _client: &mut Client<MockTransport>) -> anyhow::Result<()> {
        *self.steps.lock().unwrap() += 1;
        Ok(())
    }

    async fn on_message(
        &mut self,
        client: &mut Client<MockTransport>,
        event: &Event,
    ) -> anyhow::Result<bool> {
        if let Some(reply_to) = event.reply_to() {
            self.acks.lock().unwrap().push(reply_to);
        }
        if event.channel().is_none() || event.user().is_none() {
            return Ok(false);
        }
        let Some(text) = client.message_text(event)? else {
            return Ok(false);
        };
        self.seen.lock().unwrap().push(text.clone());

        match text.as_str() {
            "poll start" => {
                *self.poll_starts.lock().unwrap() += 1;
                client.respond(event, "*POLL STARTED*").await?;
                Ok(true)
            }
            "explode" => Err(anyhow!("handler blew up")),
            "panic" => panic!("handler panicked"),
            "quit" => Err(BotError::Cancelled.into()),
            _ => Ok(false),
        }
    }
}

async fn connected_bot(mock: MockTransport) -> (Bot<MockTransport, PollHandler>, PollHandler) {
    let handler = PollHandler::default();
    let mut bot = Bot::new(
        mock.with_directory(directory()),
        handler.clone(),
        TimingConfig::default(),
    );
    bot.client_mut().session_mut().connect().await.unwrap();
    (bot, handler)
}

#[tokio::test(start_paused = true)]
async fn test_poll_start_fires_exactly_once_per_tick() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, handler) = connected_bot(mock).await;

    handle.push_event(Event::message("C1", "U1", "poll start", "1.0"));
    bot.tick().await.unwrap();
    bot.tick().await.unwrap();

    assert_eq!(*handler.poll_starts.lock().unwrap(), 1);
    assert_eq!(handle.sent_texts(), vec!["*POLL STARTED*"]);
    assert_eq!(*handler.steps.lock().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_events_delivered_in_arrival_order() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, handler) = connected_bot(mock).await;

    for text in ["one", "two", "three"] {
        handle.push_event(Event::message("C1", "U1", text, "1.0"));
    }
    bot.tick().await.unwrap();

    assert_eq!(*handler.seen.lock().unwrap(), vec!["one", "two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_does_not_stop_later_events() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, handler) = connected_bot(mock).await;

    handle.push_event(Event::message("C1", "U1", "explode", "1.0"));
    handle.push_event(Event::message("C1", "U1", "panic", "2.0"));
    handle.push_event(Event::message("C1", "U1", "poll start", "3.0"));
    bot.tick().await.unwrap();

    assert_eq!(
        *handler.seen.lock().unwrap(),
        vec!["explode", "panic", "poll start"]
    );
    assert_eq!(*handler.poll_starts.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_without_channel_or_user_are_ignored_by_handler() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, handler) = connected_bot(mock).await;

    handle.push_event(Event::new(json!({"type": "hello"})));
    handle.push_event(Event::new(json!({"type": "message", "text": "poll start"})));
    bot.tick().await.unwrap();

    assert!(handler.seen.lock().unwrap().is_empty());
    assert_eq!(*handler.poll_starts.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_from_handler_propagates() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, _handler) = connected_bot(mock).await;

    handle.push_event(Event::message("C1", "U1", "quit", "1.0"));
    let err = bot.tick().await.unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test(start_paused = true)]
async fn test_step_hook_failure_is_isolated() {
    struct FlakyStep {
        steps: usize,
    }

    #[async_trait]
    impl Handler<MockTransport> for FlakyStep {
        async fn on_step(&mut self, _client: &mut Client<MockTransport>) -> anyhow::Result<()> {
            self.steps += 1;
            if self.steps % 2 == 1 {
                anyhow::bail!("odd step");
            }
            Ok(())
        }

        async fn on_message(
            &mut self,
            _client: &mut Client<MockTransport>,
            _event: &Event,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    let mut bot = Bot::new(
        MockTransport::new(),
        FlakyStep { steps: 0 },
        TimingConfig::default(),
    );
    bot.client_mut().session_mut().connect().await.unwrap();
    for _ in 0..3 {
        bot.tick().await.unwrap();
    }
    assert_eq!(bot.handler().steps, 3);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_while_running() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let handler = PollHandler::default();
    let mut bot = Bot::new(mock, handler, TimingConfig::default());

    let cancel = bot.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        cancel.cancel();
    });
    bot.start_loop().await;

    // Pings go out once more than 5s have passed since the last one
    assert_eq!(handle.ping_count(), 2);
    assert_eq!(handle.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_retries_after_backoff() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    mock.fail_next_connect(BotError::Connection("network unreachable".into()));
    mock.fail_next_identify(BotError::Authentication("invalid_auth".into()));
    let mut bot = Bot::new(mock, PollHandler::default(), TimingConfig::default());

    let cancel = bot.cancellation_token();
    let observer = tokio::spawn(async move {
        let mut observed = Vec::new();
        tokio::time::sleep(Duration::from_secs(4)).await;
        observed.push((handle.connect_count(), handle.is_connected()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        observed.push((handle.connect_count(), handle.is_connected()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        observed.push((handle.connect_count(), handle.is_connected()));
        cancel.cancel();
        observed
    });
    bot.start_loop().await;

    // connect fails at 0s, identify fails at 5s, third attempt at 10s succeeds
    let observed = observer.await.unwrap();
    assert_eq!(observed, vec![(1, false), (2, false), (3, true)]);
    assert!(!bot.client().session().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_triggers_full_reconnect() {
    let mock = MockTransport::new().with_directory(directory()).auto_acknowledge();
    let handle = mock.clone();
    let handler = PollHandler::default();
    let mut bot = Bot::new(mock, handler.clone(), TimingConfig::default());

    let cancel = bot.cancellation_token();
    let driver = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.push_event(Event::message("C1", "U1", "poll start", "1.0"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        driver.fail_next_read(BotError::Connection("socket closed".into()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        driver.push_event(Event::message("C1", "U1", "poll start", "2.0"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });
    bot.start_loop().await;

    assert_eq!(handle.connect_count(), 2);
    assert_eq!(*handler.poll_starts.lock().unwrap(), 2);
    // Correlation IDs restart with the new connection
    let ids: Vec<u64> = handle
        .sent_frames()
        .iter()
        .filter_map(|f| f.frame["id"].as_u64())
        .collect();
    assert_eq!(ids, vec![1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgements_settle_pending_messages() {
    let mock = MockTransport::new().auto_acknowledge();
    let (mut bot, _handler) = connected_bot(mock).await;

    bot.client_mut().say("C1", "hello").await.unwrap();
    assert_eq!(bot.client().session().pending_count(), 1);
    bot.tick().await.unwrap();
    assert_eq!(bot.client().session().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_exits_immediately() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let mut bot = Bot::new(mock, PollHandler::default(), TimingConfig::default());
    bot.cancellation_token().cancel();
    bot.start_loop().await;
    assert_eq!(handle.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_acknowledgement_after_timeout_reaches_handler() {
    let mock = MockTransport::new();
    let handle = mock.clone();
    let (mut bot, handler) = connected_bot(mock).await;

    let err = bot
        .client_mut()
        .send_and_confirm("C1", "hello", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Timeout { message_id: 1, .. }));
    // The send is not rolled back
    assert_eq!(handle.sent_frames().len(), 1);
    assert_eq!(handle.sent_texts(), vec!["hello"]);
    assert_eq!(bot.client().session().pending_count(), 0);

    handle.push_event(Event::new(json!({
        "ok": true,
        "reply_to": 1,
        "ts": "1700000000.000001",
    })));
    bot.tick().await.unwrap();

    assert_eq!(*handler.acks.lock().unwrap(), vec![1]);
    assert_eq!(bot.client().session().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_panic_triggers_full_reconnect() {
    let mock = MockTransport::new().with_directory(directory());
    let handle = mock.clone();
    let handler = PollHandler::default();
    let mut bot = Bot::new(mock, handler.clone(), TimingConfig::default());

    let cancel = bot.cancellation_token();
    let driver = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.push_event(Event::message("C1", "U1", "poll start", "1.0"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        driver.panic_next_read("read buffer corrupted");
        tokio::time::sleep(Duration::from_secs(6)).await;
        driver.push_event(Event::message("C1", "U1", "poll start", "2.0"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });
    bot.start_loop().await;

    assert_eq!(handle.connect_count(), 2);
    assert_eq!(*handler.poll_starts.lock().unwrap(), 2);
    assert!(!bot.client().session().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_from_handler_stops_the_loop() {
    let mock = MockTransport::new().with_directory(directory());
    let handle = mock.clone();
    let handler = PollHandler::default();
    let mut bot = Bot::new(mock, handler.clone(), TimingConfig::default());

    handle.push_event(Event::message("C1", "U1", "quit", "1.0"));
    bot.start_loop().await;

    assert_eq!(handle.connect_count(), 1);
    assert_eq!(*handler.seen.lock().unwrap(), vec!["quit"]);
    assert!(!handle.is_connected());
}
