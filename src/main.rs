#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wabridge::channels::{Channel, GreenApiClient, TelegramChannel};
use wabridge::{daemon, Config};

/// wabridge — one-way WhatsApp → Telegram chat bridge over Green-API.
#[derive(Parser, Debug)]
#[command(name = "wabridge")]
#[command(version)]
#[command(about = "Mirror one WhatsApp chat into one Telegram chat.", long_about = None)]
struct Cli {
    /// Override the config directory (also: WABRIDGE_CONFIG_DIR).
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge daemon (the default).
    Run,
    /// Validate configuration and probe both APIs.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Some(dir) = &cli.config_dir {
        std::env::set_var("WABRIDGE_CONFIG_DIR", dir);
    }

    let config = Config::load_or_init().await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            config.ensure_ready()?;
            daemon::run(config).await
        }
        Commands::Doctor => doctor(config).await,
    }
}

async fn doctor(config: Config) -> Result<()> {
    println!("Config: {}", config.config_path.display());

    if let Err(e) = config.ensure_ready() {
        println!("✗ config: {e}");
        anyhow::bail!("configuration incomplete");
    }
    println!("✓ config: all required settings present");

    let green = GreenApiClient::new(
        config.green_api.api_url.clone(),
        config.green_api.id_instance.clone(),
        config.green_api.api_token.clone(),
    );
    let mut failed = false;

    match green.state_instance().await {
        Ok(state) if state == "authorized" => println!("✓ green-api: instance authorized"),
        Ok(state) => {
            println!("✗ green-api: instance state is '{state}' (expected 'authorized')");
            failed = true;
        }
        Err(e) => {
            println!("✗ green-api: {e}");
            failed = true;
        }
    }

    let telegram = TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.chat_id.clone(),
    )
    .with_api_base(config.telegram.api_base.clone());

    if telegram.health_check().await {
        println!("✓ telegram: bot token accepted");
    } else {
        println!("✗ telegram: getMe failed (bad token or no network)");
        failed = true;
    }

    if failed {
        anyhow::bail!("doctor found problems");
    }
    println!("All checks passed.");
    Ok(())
}
