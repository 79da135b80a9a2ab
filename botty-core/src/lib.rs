// ABOUTME: Transport-agnostic engine for realtime chat bots
// ABOUTME: Session lifecycle, rate-limited sends, ack correlation, dispatch loop, wire text codec

pub mod buffer;
pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod sender;
pub mod session;
pub mod testing;
pub mod transport;

pub use buffer::EventBuffer;
pub use client::Client;
pub use config::{BotConfig, SlackConfig, TimingConfig};
pub use directory::{DirectoryEntry, DirectorySnapshot, NameLookup};
pub use dispatch::{Bot, Handler, LoggingHandler};
pub use error::{BotError, Result};
pub use event::{Acknowledgement, Event};
pub use session::{PendingMessage, Session, SessionState};
pub use transport::Transport;
