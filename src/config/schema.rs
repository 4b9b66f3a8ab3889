use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Written the first time the daemon starts without a config file.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# wabridge configuration.
# Every value here can be overridden through the environment; see README.md.

[green_api]
# Base URL of your Green-API instance (keep the default unless your instance
# lives on a dedicated subdomain like https://7103.api.greenapi.com).
api_url = "https://api.green-api.com"
id_instance = ""
api_token = ""
# WhatsApp chat to mirror, e.g. "120363043968066561@g.us" for a group.
source_chat = ""

[telegram]
bot_token = ""
# Destination chat, e.g. "-1001234567890" for a supergroup.
chat_id = ""

[bridge]
poll_interval_secs = 10
history_depth = 30
forward_outgoing = false
replay_limit = 10

[gateway]
host = "0.0.0.0"
port = 10000
"#;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level wabridge configuration, loaded from `config.toml`.
///
/// Resolution order for the config directory: `WABRIDGE_CONFIG_DIR` env →
/// `~/.wabridge`. Environment overrides are applied after parsing, so the
/// daemon also runs file-less on hosting platforms that only provide env vars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Green-API instance credentials and source chat (`[green_api]`).
    #[serde(default)]
    pub green_api: GreenApiConfig,

    /// Telegram bot token and destination chat (`[telegram]`).
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Polling, dedup and replay tuning (`[bridge]`).
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Liveness listener bind address (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Component supervisor backoff (`[reliability]`).
    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

// ── Sections ─────────────────────────────────────────────────────

/// Green-API (WhatsApp gateway) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreenApiConfig {
    /// Base URL; request paths follow `/waInstance{id}/{method}/{token}`.
    #[serde(default = "default_green_api_url")]
    pub api_url: String,
    /// Instance id from the Green-API console.
    #[serde(default)]
    pub id_instance: String,
    /// API token paired with the instance id.
    #[serde(default)]
    pub api_token: String,
    /// The one WhatsApp chat the bridge mirrors (`…@c.us` or `…@g.us`).
    #[serde(default)]
    pub source_chat: String,
}

impl Default for GreenApiConfig {
    fn default() -> Self {
        Self {
            api_url: default_green_api_url(),
            id_instance: String::new(),
            api_token: String::new(),
            source_chat: String::new(),
        }
    }
}

/// Telegram Bot API settings for the destination chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (from @BotFather).
    #[serde(default)]
    pub bot_token: String,
    /// The one destination chat id.
    #[serde(default)]
    pub chat_id: String,
    /// Bot API base; only changed for local test servers.
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
        }
    }
}

/// Forwarding-engine tuning. None of these need touching for a single busy
/// group chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Seconds between history polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How many history records to request per poll.
    #[serde(default = "default_history_depth")]
    pub history_depth: u32,
    /// Mirror the source chat's own outgoing messages too.
    #[serde(default)]
    pub forward_outgoing: bool,
    /// Default and hard cap for `/h [n]` replay.
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    /// Seen-message-id cache size; oldest ids are trimmed past this.
    #[serde(default = "default_seen_cache_size")]
    pub seen_cache_size: usize,
    /// Media larger than this is forwarded as a link instead of re-uploaded.
    #[serde(default = "default_media_max_bytes")]
    pub media_max_bytes: u64,
    /// Reply-quote preview length in characters.
    #[serde(default = "default_quote_preview_chars")]
    pub quote_preview_chars: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            history_depth: default_history_depth(),
            forward_outgoing: false,
            replay_limit: default_replay_limit(),
            seen_cache_size: default_seen_cache_size(),
            media_max_bytes: default_media_max_bytes(),
            quote_preview_chars: default_quote_preview_chars(),
        }
    }
}

/// Liveness listener bind address. Hosting platforms probe this from outside,
/// so the default binds all interfaces (unlike an API server, there is nothing
/// here worth protecting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

/// Supervisor restart backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

fn default_green_api_url() -> String {
    "https://api.green-api.com".to_string()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_history_depth() -> u32 {
    30
}

fn default_replay_limit() -> usize {
    10
}

fn default_seen_cache_size() -> usize {
    4096
}

fn default_media_max_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_quote_preview_chars() -> usize {
    96
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    10_000
}

fn default_initial_backoff_secs() -> u64 {
    2
}

fn default_max_backoff_secs() -> u64 {
    60
}

// ── Loading ──────────────────────────────────────────────────────

fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("WABRIDGE_CONFIG_DIR") {
        let custom = custom.trim();
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }

    let user_dirs = UserDirs::new().context("Could not determine home directory")?;
    Ok(user_dirs.home_dir().join(".wabridge"))
}

/// First non-empty value among the named environment variables.
fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let dir = resolve_config_dir()?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let config_path = dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
                .await
                .context("Failed to write default config file")?;
            tracing::info!("Wrote default config to {}", config_path.display());
        }

        let contents = fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        config.config_path = config_path;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment always wins over the file. The unprefixed names are the
    /// ones the bridge historically ran on in env-only deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_first(&["WABRIDGE_TELEGRAM_BOT_TOKEN", "TELEGRAM_BOT_TOKEN"]) {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = env_first(&["WABRIDGE_TELEGRAM_CHAT_ID", "TELEGRAM_CHAT_ID"]) {
            self.telegram.chat_id = chat;
        }
        if let Some(id) = env_first(&["WABRIDGE_GREEN_API_ID_INSTANCE", "GREEN_API_ID_INSTANCE"]) {
            self.green_api.id_instance = id;
        }
        if let Some(token) = env_first(&["WABRIDGE_GREEN_API_TOKEN", "GREEN_API_TOKEN"]) {
            self.green_api.api_token = token;
        }
        if let Some(url) = env_first(&["WABRIDGE_GREEN_API_URL", "GREEN_API_URL"]) {
            self.green_api.api_url = url;
        }
        if let Some(chat) = env_first(&["WABRIDGE_GREEN_API_SOURCE_CHAT", "GREEN_API_SOURCE_CHAT"])
        {
            self.green_api.source_chat = chat;
        }

        if let Some(interval) = env_first(&["WABRIDGE_POLL_INTERVAL_SECS"]) {
            match interval.parse::<u64>() {
                Ok(secs) if secs > 0 => self.bridge.poll_interval_secs = secs,
                _ => tracing::warn!("Ignoring invalid WABRIDGE_POLL_INTERVAL_SECS={interval}"),
            }
        }

        if let Some(port) = env_first(&["WABRIDGE_GATEWAY_PORT", "PORT"]) {
            match port.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT={port}"),
            }
        }
        if let Some(host) = env_first(&["WABRIDGE_GATEWAY_HOST", "HOST"]) {
            self.gateway.host = host;
        }
    }

    /// Fail with one readable error naming every missing credential.
    pub fn ensure_ready(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.green_api.id_instance.is_empty() {
            missing.push("green_api.id_instance (GREEN_API_ID_INSTANCE)");
        }
        if self.green_api.api_token.is_empty() {
            missing.push("green_api.api_token (GREEN_API_TOKEN)");
        }
        if self.green_api.source_chat.is_empty() {
            missing.push("green_api.source_chat (GREEN_API_SOURCE_CHAT)");
        }
        if self.telegram.bot_token.is_empty() {
            missing.push("telegram.bot_token (TELEGRAM_BOT_TOKEN)");
        }
        if self.telegram.chat_id.is_empty() {
            missing.push("telegram.chat_id (TELEGRAM_CHAT_ID)");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Missing required settings: {}. Set them in {} or via the env vars in parentheses.",
                missing.join(", "),
                self.config_path.display()
            )
        }
    }
}
