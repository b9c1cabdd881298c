use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

use crate::dispatch::RecipientId;
use crate::markup::MarkupMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub web: WebConfig,
    /// Absent means Signal recipients cannot be reached.
    #[serde(default)]
    pub signal: Option<SignalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat id of the internal staff conversation
    pub staffchat_id: i64,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: MarkupMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_listen")]
    pub listen: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_web_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalConfig {
    /// Phone number of the registered signal-cli account (e.g. "+15550001111")
    pub account: String,
    #[serde(default = "default_signal_cli_path")]
    pub cli_path: String,
    #[serde(default = "default_signal_timeout_secs")]
    pub timeout_secs: u64,
}

/// The slice of configuration the dispatcher reads on every send.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub parse_mode: MarkupMode,
    pub staffchat_id: RecipientId,
}

fn default_parse_mode() -> MarkupMode {
    MarkupMode::Html
}

fn default_web_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8720))
}

fn default_signal_cli_path() -> String {
    "signal-cli".to_string()
}

fn default_signal_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Initial settings snapshot for the dispatcher.
    pub fn settings(&self) -> Settings {
        Settings {
            parse_mode: self.telegram.parse_mode,
            staffchat_id: RecipientId::Numeric(self.telegram.staffchat_id),
        }
    }
}
