//! vk-listen: print VK long-poll events as JSON lines
//!
//! Configuration is layered: an optional TOML file, then `.env` and
//! environment variables, then command-line flags.

use std::io::Write;
use std::path::Path;

use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tracing_subscriber::EnvFilter;
use vk_longpoll::{SessionConfig, VkClient};

const DEFAULT_LOG_FILTER: &str = "vk_listen=info,vk_longpoll=info";

#[derive(Parser)]
#[command(name = "vk-listen")]
#[command(about = "Listen to VK long-poll events and print them as JSON lines")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "vk-listen.toml")]
    config: String,

    /// Access token (overrides config file)
    #[arg(long, env = "VK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Community ID; omit for user long-poll
    #[arg(long, env = "VK_GROUP_ID")]
    group_id: Option<u64>,

    /// API version (overrides config file)
    #[arg(long, env = "VK_API_VERSION")]
    api_version: Option<String>,

    /// Long-poll wait in seconds (overrides config file)
    #[arg(long, env = "VK_WAIT")]
    wait: Option<u64>,

    /// User long-poll mode flags
    #[arg(long)]
    mode: Option<u32>,

    /// User long-poll version
    #[arg(long)]
    lp_version: Option<u32>,

    /// Stop after this many events
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&content)?
    } else {
        info!("Config file not found, using defaults");
        SessionConfig::default()
    };

    // Apply CLI overrides
    if let Some(token) = &cli.token {
        config.access_token = token.clone();
    }
    if let Some(group_id) = cli.group_id {
        config.group_id = Some(group_id);
    }
    if let Some(api_version) = &cli.api_version {
        config.api_version = api_version.clone();
    }
    if let Some(wait) = cli.wait {
        config.wait = wait;
    }
    if let Some(mode) = cli.mode {
        config.user_mode = mode;
    }
    if let Some(version) = cli.lp_version {
        config.user_version = version;
    }

    if config.access_token.is_empty() {
        anyhow::bail!("no access token: pass --token or set VK_TOKEN");
    }
    Ok(config)
}

/// `RUST_LOG` wins when set and valid; otherwise both crates log at info.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match config.group_id {
        Some(group_id) => info!(group_id, "Using group long-poll"),
        None => info!("Using user long-poll"),
    }
    info!(
        api_version = %config.api_version,
        wait = config.wait,
        "Starting vk-listen"
    );

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, stopping");
                token.cancel();
            }
        });
    }

    let client = VkClient::new(config)?;
    let mut events = client.listen_until(token);
    let mut stdout = std::io::stdout().lock();
    let mut received = 0usize;

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                serde_json::to_writer(&mut stdout, &event)?;
                writeln!(stdout)?;
                stdout.flush()?;

                received += 1;
                if cli.limit.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Long-poll stopped");
                return Err(e.into());
            }
        }
    }

    info!(received, "vk-listen finished");
    Ok(())
}
