// ABOUTME: Platform transports implementing botty_core::Transport
// ABOUTME: Live Slack RTM over a websocket, and an interactive console for local debugging

#[cfg(feature = "console")]
pub mod console;
#[cfg(feature = "rtm")]
pub mod rtm;
#[cfg(feature = "rtm")]
pub mod web_api;

#[cfg(feature = "console")]
pub use console::ConsoleTransport;
#[cfg(feature = "rtm")]
pub use rtm::RtmTransport;
