// ABOUTME: Root library module exposing the Slack transports and the core engine
// ABOUTME: Platform-agnostic types are re-exported from botty-core

pub mod transport;

// Re-export the engine so binaries and plugins need a single dependency
pub use botty_core::{
    codec, Bot, BotConfig, BotError, Client, DirectoryEntry, DirectorySnapshot, Event, Handler,
    LoggingHandler, NameLookup, Result, SlackConfig, TimingConfig, Transport,
};
