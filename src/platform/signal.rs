//! Signal delivery through the `signal-cli` binary.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::SecureMessenger;
use crate::config::SignalConfig;

/// Sends Signal messages by running `signal-cli -a <account> send`.
pub struct SignalCli {
    config: Option<SignalConfig>,
}

impl SignalCli {
    pub fn new(config: Option<SignalConfig>) -> Self {
        match &config {
            Some(c) => info!("Signal enabled for account {} via {}", c.account, c.cli_path),
            None => info!("Signal not configured"),
        }
        Self { config }
    }
}

/// Reject recipients that signal-cli would read as flags or that carry
/// whitespace/control characters.
pub fn validate_recipient(recipient: &str) -> Result<&str> {
    if recipient.is_empty() {
        bail!("Signal recipient is empty");
    }
    if recipient.starts_with('-') {
        bail!("Signal recipient may not start with '-': {}", recipient);
    }
    if recipient
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        bail!("Signal recipient contains whitespace or control characters");
    }
    Ok(recipient)
}

/// Arguments for one `signal-cli` send. The message goes after `-m` as a
/// single argument; no shell is involved.
fn send_args(account: &str, recipient: &str, text: &str) -> Vec<String> {
    vec![
        "-a".to_string(),
        account.to_string(),
        "send".to_string(),
        "-m".to_string(),
        text.to_string(),
        recipient.to_string(),
    ]
}

#[async_trait]
impl SecureMessenger for SignalCli {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
        let Some(config) = &self.config else {
            bail!("Cannot send to Signal recipient {}: Signal is not configured", recipient);
        };
        let recipient = validate_recipient(recipient)?;

        let output = tokio::time::timeout(
            Duration::from_secs(config.timeout_secs),
            Command::new(&config.cli_path)
                .args(send_args(&config.account, recipient, text))
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("signal-cli timed out after {}s", config.timeout_secs))?
        .with_context(|| format!("Failed to run {}", config.cli_path))?;

        if !output.status.success() {
            bail!(
                "signal-cli exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        debug!("Signal message sent to {} ({} chars)", recipient, text.len());
        Ok(())
    }
}
