// ABOUTME: Main entry point for the botty Slack bot
// ABOUTME: Initializes logging and config, picks a transport, and runs the dispatch loop until Ctrl-C

use anyhow::{Context, Result};
use botty::{Bot, BotConfig, LoggingHandler, TimingConfig, Transport};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "botty", version, about = "Slack real-time messaging bot")]
struct Cli {
    /// Config file (overrides BOTTY_CONFIG_PATH and ./botty.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Talk to the terminal instead of Slack
    #[arg(long, default_value_t = false)]
    console: bool,

    /// Output logs as JSON instead of human-readable
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handler panics are caught by the dispatch loop; this still records where they came from
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC! {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.json);

    if let Some(path) = &cli.config {
        std::env::set_var("BOTTY_CONFIG_PATH", path);
    }
    let config = BotConfig::load(!cli.console).context("Failed to load configuration")?;

    tracing::info!(
        console = cli.console,
        api_base = %config.slack.api_base,
        send_interval_ms = config.timing.send_interval_ms,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            ctrl_c.cancel();
        }
    });

    if cli.console {
        run_console(config, cancel).await
    } else {
        run_rtm(config, cancel).await
    }
}

async fn run<T: Transport>(transport: T, timing: TimingConfig, cancel: CancellationToken) {
    let mut bot = Bot::with_cancellation(transport, LoggingHandler, timing, cancel);
    bot.start_loop().await;
}

#[cfg(feature = "console")]
async fn run_console(config: BotConfig, cancel: CancellationToken) -> Result<()> {
    run(botty::transport::ConsoleTransport::new(), config.timing, cancel).await;
    Ok(())
}

#[cfg(not(feature = "console"))]
async fn run_console(_config: BotConfig, _cancel: CancellationToken) -> Result<()> {
    anyhow::bail!("botty was built without the console feature")
}

#[cfg(feature = "rtm")]
async fn run_rtm(config: BotConfig, cancel: CancellationToken) -> Result<()> {
    let transport = botty::transport::RtmTransport::new(&config.slack)
        .context("Failed to create Slack transport")?;
    run(transport, config.timing, cancel).await;
    Ok(())
}

#[cfg(not(feature = "rtm"))]
async fn run_rtm(_config: BotConfig, _cancel: CancellationToken) -> Result<()> {
    anyhow::bail!("botty was built without the rtm feature")
}
