pub mod signal;
pub mod telegram;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;
use async_trait::async_trait;

use crate::dispatch::{RecipientId, SendOptions};

/// A message received from any platform
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct IncomingMessage {
    /// Platform identifier (e.g., "telegram", "web")
    pub platform: String,
    /// Platform-specific user ID as string
    pub user_id: String,
    /// Where replies to this message should be routed
    pub chat_id: RecipientId,
    /// Display name of the user
    pub user_name: String,
    /// The message text
    pub text: String,
}

/// The chat-platform bot API.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, chat: &RecipientId, text: &str, options: &SendOptions)
        -> Result<()>;
}

/// Live web chat sessions, addressed by session id.
#[async_trait]
pub trait SocketLayer: Send + Sync {
    async fn emit_to_session(&self, session_id: &str, event: &str, payload: &str) -> Result<()>;
}

/// Secure-messaging channel (Signal).
#[async_trait]
pub trait SecureMessenger: Send + Sync {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()>;
}
