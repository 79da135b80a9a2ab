// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Holds the Slack credential and every timing constant the engine depends on
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (xoxb-...) used for rtm.connect and Web API calls
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
        }
    }
}

// Custom Debug impl to redact the token
impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Timing constants. One "time unit" of the protocol is one second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    /// Minimum spacing between consecutive sends (platform API limit)
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Maximum gap between liveness pings once connected
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Pause before a full reconnect after a loop failure
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
    /// Sleep between dispatch loop ticks
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Poll interval while waiting for an acknowledgement
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
    /// Default deadline for `send_and_confirm`
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            tick_ms: default_tick_ms(),
            confirm_poll_ms: default_confirm_poll_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("timing.send_interval_ms", self.send_interval_ms),
            ("timing.keepalive_interval_secs", self.keepalive_interval_secs),
            ("timing.reconnect_backoff_secs", self.reconnect_backoff_secs),
            ("timing.tick_ms", self.tick_ms),
            ("timing.confirm_poll_ms", self.confirm_poll_ms),
            ("timing.confirm_timeout_secs", self.confirm_timeout_secs),
        ];
        for (name, value) in fields {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_send_interval_ms() -> u64 {
    1000
}

fn default_keepalive_interval_secs() -> u64 {
    5
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_tick_ms() -> u64 {
    10
}

fn default_confirm_poll_ms() -> u64 {
    10
}

fn default_confirm_timeout_secs() -> u64 {
    5
}

impl BotConfig {
    /// Find the config file, checking in order:
    /// 1. BOTTY_CONFIG_PATH env var (if set)
    /// 2. ./botty.toml
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("BOTTY_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("botty.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        None
    }

    /// Load configuration from file (if any) with environment variable overrides.
    ///
    /// `require_token` is false for the console transport, which never talks to Slack.
    pub fn load(require_token: bool) -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            Self::from_file(&config_path)?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            BotConfig::default()
        };

        config.apply_env_overrides()?;

        if require_token && config.slack.token.trim().is_empty() {
            anyhow::bail!("slack.token is required (set in botty.toml or SLACK_TOKEN env var)");
        }
        config.timing.validate()?;

        Ok(config)
    }

    /// Parse a config file without env overrides or validation
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<BotConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("SLACK_TOKEN") {
            self.slack.token = val;
        }
        if let Ok(val) = std::env::var("SLACK_API_BASE") {
            self.slack.api_base = val;
        }
        if let Ok(val) = std::env::var("BOTTY_SEND_INTERVAL_MS") {
            self.timing.send_interval_ms = val.parse().with_context(|| {
                format!("BOTTY_SEND_INTERVAL_MS must be a valid number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("BOTTY_TICK_MS") {
            self.timing.tick_ms = val
                .parse()
                .with_context(|| format!("BOTTY_TICK_MS must be a valid number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("BOTTY_RECONNECT_BACKOFF_SECS") {
            self.timing.reconnect_backoff_secs = val.parse().with_context(|| {
                format!(
                    "BOTTY_RECONNECT_BACKOFF_SECS must be a valid number, got: {}",
                    val
                )
            })?;
        }
        Ok(())
    }
}
