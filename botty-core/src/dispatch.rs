// ABOUTME: Top-level dispatch loop: step hook, per-event message hook, keepalive, reconnect
// ABOUTME: Hook and session failures, errors or panics, are isolated; only cancellation stops the bot

use crate::client::Client;
use crate::config::TimingConfig;
use crate::error::{self, BotError, Result};
use crate::event::Event;
use crate::transport::Transport;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;

/// Plugin hooks driven by the dispatch loop.
///
/// Errors returned from either hook are logged and swallowed, except a
/// [`BotError::Cancelled`] anywhere in the error chain, which stops the bot.
#[async_trait]
pub trait Handler<T: Transport>: Send {
    /// Called once per tick, before any events are delivered
    async fn on_step(&mut self, client: &mut Client<T>) -> anyhow::Result<()> {
        let _ = client;
        Ok(())
    }

    /// Called once per inbound event in arrival order.
    /// Returns whether the handler consumed the event.
    async fn on_message(&mut self, client: &mut Client<T>, event: &Event) -> anyhow::Result<bool>;
}

/// Handler that only logs what it sees
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl<T: Transport> Handler<T> for LoggingHandler {
    async fn on_step(&mut self, _client: &mut Client<T>) -> anyhow::Result<()> {
        tracing::trace!("Step handler called");
        Ok(())
    }

    async fn on_message(&mut self, _client: &mut Client<T>, event: &Event) -> anyhow::Result<bool> {
        tracing::info!(event = %event, "Message handler called");
        Ok(false)
    }
}

/// A bot: one transport, one handler, one control loop.
pub struct Bot<T: Transport, H: Handler<T>> {
    client: Client<T>,
    handler: H,
}

impl<T: Transport, H: Handler<T>> Bot<T, H> {
    pub fn new(transport: T, handler: H, timing: TimingConfig) -> Self {
        Self::with_cancellation(transport, handler, timing, CancellationToken::new())
    }

    /// Build a bot that stops when `cancel` fires (e.g. wired to Ctrl-C)
    pub fn with_cancellation(
        transport: T,
        handler: H,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client: Client::new(transport, timing, cancel),
            handler,
        }
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client<T> {
        &mut self.client
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.client.cancellation_token().clone()
    }

    /// Run until cancelled, reconnecting after a fixed backoff whenever a session fails
    pub async fn start_loop(&mut self) {
        let cancel = self.cancellation_token();
        let backoff = self.client.timing().reconnect_backoff();

        loop {
            let retry = match AssertUnwindSafe(self.start()).catch_unwind().await {
                Ok(Ok(())) => false,
                Ok(Err(e)) if !e.is_retryable() => false,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Main loop failed");
                    true
                }
                Err(panic) => {
                    tracing::error!(
                        panic = %panic_message(panic.as_ref()),
                        "Main loop panicked"
                    );
                    true
                }
            };
            self.client.session_mut().reset().await;

            if !retry {
                break;
            }
            tracing::info!(
                backoff_secs = backoff.as_secs(),
                "Restarting in {} seconds",
                backoff.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("Shutting down");
    }

    /// One session lifecycle: connect, then tick until something fails.
    ///
    /// Only returns `Ok` if cancellation was already requested before connecting.
    pub async fn start(&mut self) -> Result<()> {
        let cancel = self.cancellation_token();
        if cancel.is_cancelled() {
            return Ok(());
        }

        tokio::select! {
            result = self.client.session_mut().connect() => result?,
            _ = cancel.cancelled() => return Err(BotError::Cancelled),
        }

        let tick = self.client.timing().tick();
        loop {
            self.tick().await?;
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = cancel.cancelled() => return Err(BotError::Cancelled),
            }
        }
    }

    /// Run the step hook, deliver every pending event, and ping the connection if due
    pub async fn tick(&mut self) -> Result<()> {
        let step = AssertUnwindSafe(self.handler.on_step(&mut self.client))
            .catch_unwind()
            .await;
        match step {
            Ok(Ok(())) => {}
            Ok(Err(e)) if error::is_cancellation(&e) => return Err(BotError::Cancelled),
            Ok(Err(e)) => tracing::error!(error = ?e, "Step processing failed"),
            Err(panic) => tracing::error!(
                panic = %panic_message(panic.as_ref()),
                "Step processing panicked"
            ),
        }

        self.client.session_mut().pump()?;
        let events = self.client.session().buffer().drain_all();
        for event in events {
            self.client.settle(&event);

            let outcome = AssertUnwindSafe(self.handler.on_message(&mut self.client, &event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(handled)) => tracing::trace!(handled, "Message processed"),
                Ok(Err(e)) if error::is_cancellation(&e) => return Err(BotError::Cancelled),
                Ok(Err(e)) => tracing::error!(
                    error = ?e,
                    event = %event,
                    "Message processing failed"
                ),
                Err(panic) => tracing::error!(
                    panic = %panic_message(panic.as_ref()),
                    event = %event,
                    "Message processing panicked"
                ),
            }
        }

        if self.client.session().keepalive_due() {
            self.client.session_mut().keep_alive().await?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
