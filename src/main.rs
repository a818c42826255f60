mod api;
mod commands;
mod gateway;
mod playback;
mod session;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use melodia_channels::{qr, LoopbackTransport};
use melodia_core::config::{self, shellexpand, BotConfig, TransportKind};
use melodia_core::traits::Transport;
use melodia_ledger::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(
    name = "melodia",
    version,
    about = "Melodia: now-playing chat bot with a supervised messaging session"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", env = "MELODIA_CONFIG")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot and its admin API.
    Start,
    /// Query a running instance over its admin API.
    Status {
        /// Base URL of the admin API. Defaults to the configured host and port.
        #[arg(long)]
        url: Option<String>,
    },
}

/// Console logging, plus a daily-rotated file under `{data_dir}/logs` when enabled.
/// The returned guard must live as long as the process logs.
fn init_logging(bot: &BotConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&bot.log_level))
    };
    let console = fmt::layer().with_filter(filter());

    if !bot.log_to_file {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let dir = PathBuf::from(shellexpand(&bot.data_dir)).join("logs");
    let appender = tracing_appender::rolling::daily(dir, "melodia.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());
    tracing_subscriber::registry().with(console).with(file).init();
    Some(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _log_guard = init_logging(&cfg.bot);

    match cli.command {
        Commands::Start => {
            let ledger = Arc::new(Store::new(&cfg.ledger).await?);
            let transport: Arc<dyn Transport> = match cfg.bot.transport {
                TransportKind::Loopback => {
                    Arc::new(LoopbackTransport::from_data_dir(&cfg.bot.data_dir))
                }
            };

            println!("{}: starting...", cfg.bot.name);
            let gw = gateway::Gateway::new(cfg, transport, ledger);
            gw.run().await?;
        }
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| format!("http://{}:{}", cfg.api.host, cfg.api.port));
            print_status(&base, &cfg.api.api_key).await?;
        }
    }

    Ok(())
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStatus {
    status: String,
    qr_code: Option<String>,
    phone_number: Option<String>,
}

async fn print_status(base: &str, api_key: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{}/api/bot/status", base.trim_end_matches('/')));
    if !api_key.is_empty() {
        req = req.bearer_auth(api_key);
    }
    let resp = req.send().await?.error_for_status()?;
    let status: RemoteStatus = resp.json().await?;

    println!("Melodia status\n");
    println!("  api:     {base}");
    println!("  session: {}", status.status);
    if let Some(phone) = status.phone_number {
        println!("  account: {phone}");
    }
    if let Some(qr_data) = status.qr_code {
        println!("\nScan with the phone to link:\n");
        println!("{}", qr::generate_qr_terminal(&qr_data)?);
    }
    Ok(())
}
