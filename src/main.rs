use std::path::PathBuf;
use std::time::{Duration, Instant};

use bsevent_bridge::{BridgeConfig, Event, EventBridge, Result, Trigger};
use clap::Parser;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "bsevent",
    about = "bsevent: bridge a game event WebSocket to named triggers"
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Event source endpoint (overrides config and BSEVENT_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Restart the connection automatically when it goes down
    #[arg(long)]
    auto_start: bool,

    /// Polling tick in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[bsevent] {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Err(e) = run(config, Duration::from_millis(cli.tick_ms.max(1))).await {
        tracing::error!(error = %e, "bsevent exited with error");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    }
    .apply_env();

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if cli.auto_start {
        config.auto_start = true;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: BridgeConfig, tick: Duration) -> Result<()> {
    tracing::info!(url = %config.endpoint(), auto_start = config.auto_start, "Starting bridge");

    let mut bridge = EventBridge::new(config)?;
    bridge.start()?;

    let mut on_trigger = |trigger: Trigger, event: &Event| {
        tracing::info!(
            trigger = %trigger,
            event = %event.name(),
            time = event.timestamp(),
            "Trigger fired"
        );
    };

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                tracing::info!("Interrupted, stopping bridge");
                break;
            }
            _ = interval.tick() => {
                bridge.on_update(Instant::now(), &mut on_trigger);
            }
        }
    }

    bridge.stop();
    let mut state = bridge.subscribe_state();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, state.wait_for(|s| !s.is_active()))
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            state = %bridge.state(),
            "Bridge did not stop in time, exiting anyway"
        );
    }
    Ok(())
}
