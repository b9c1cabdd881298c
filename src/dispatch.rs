//! Outbound message dispatch.
//!
//! Escapes text for the active markup mode and hands it to exactly one
//! transport, picked from the shape of the recipient id:
//!
//! - `WEB<session>` goes to a live web chat session,
//! - `SIGNAL<number>` goes to the Signal channel,
//! - anything else is a Telegram chat id.
//!
//! The staff chat id is never treated as tagged.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::debug;

use crate::config::Settings;
use crate::markup::{collapse_spaces, MarkupMode};
use crate::platform::{ChatApi, IncomingMessage, SecureMessenger, SocketLayer};

/// Tag marking a web chat session recipient.
pub const WEB_TAG: &str = "WEB";

/// Tag marking a Signal recipient.
pub const SIGNAL_TAG: &str = "SIGNAL";

/// Event name staff messages are emitted under on the web socket.
pub const STAFF_EVENT: &str = "chat_staff";

/// A recipient as callers know it: a Telegram chat id or a tagged string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecipientId {
    Text(String),
    Numeric(i64),
}

impl RecipientId {
    /// Numeric strings become `Numeric`, everything else stays `Text`.
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<i64>() {
            Ok(id) => RecipientId::Numeric(id),
            Err(_) => RecipientId::Text(s.trim().to_string()),
        }
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientId::Text(s) => write!(f, "{}", s),
            RecipientId::Numeric(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        RecipientId::Numeric(id)
    }
}

impl From<&str> for RecipientId {
    fn from(s: &str) -> Self {
        RecipientId::Text(s.to_string())
    }
}

impl From<String> for RecipientId {
    fn from(s: String) -> Self {
        RecipientId::Text(s)
    }
}

/// Transport a recipient resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Socket { session_id: String },
    SecureChannel { recipient: String },
    NativeChat(RecipientId),
}

impl Route {
    /// Resolve a recipient against the staff chat id.
    ///
    /// Tags are matched anywhere in the string form, `WEB` before `SIGNAL`,
    /// and the sub-id is everything after the first occurrence. Only exact
    /// equality with the staff chat id bypasses tagging.
    pub fn resolve(recipient: RecipientId, staffchat_id: &RecipientId) -> Self {
        if &recipient == staffchat_id {
            return Route::NativeChat(recipient);
        }

        let tagged = recipient.to_string();
        if let Some((_, session_id)) = tagged.split_once(WEB_TAG) {
            return Route::Socket {
                session_id: session_id.to_string(),
            };
        }
        if let Some((_, id)) = tagged.split_once(SIGNAL_TAG) {
            return Route::SecureChannel {
                recipient: id.to_string(),
            };
        }

        Route::NativeChat(recipient)
    }
}

/// Options for a single send. Only the Telegram path reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Overrides the configured markup mode when set.
    pub parse_mode: Option<MarkupMode>,
    pub disable_notification: bool,
    pub protect_content: bool,
}

impl SendOptions {
    #[allow(dead_code)]
    pub fn with_parse_mode(mut self, mode: MarkupMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }
}

/// Routes outgoing messages to the Telegram bot, web chat or Signal.
pub struct MessageDispatcher {
    settings: watch::Receiver<Settings>,
    chat: Arc<dyn ChatApi>,
    socket: Arc<dyn SocketLayer>,
    secure: Arc<dyn SecureMessenger>,
}

impl MessageDispatcher {
    pub fn new(
        settings: watch::Receiver<Settings>,
        chat: Arc<dyn ChatApi>,
        socket: Arc<dyn SocketLayer>,
        secure: Arc<dyn SecureMessenger>,
    ) -> Self {
        Self {
            settings,
            chat,
            socket,
            secure,
        }
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Escape `text` and send it to `recipient` over whichever transport its
    /// id selects. Transport errors are returned as-is.
    pub async fn send(
        &self,
        recipient: impl Into<RecipientId>,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        let settings = self.settings();
        let mode = options.parse_mode.unwrap_or(settings.parse_mode);
        let text = mode.escape(text);

        match Route::resolve(recipient.into(), &settings.staffchat_id) {
            Route::Socket { session_id } => {
                debug!("Dispatching to web session {}", session_id);
                self.socket
                    .emit_to_session(&session_id, STAFF_EVENT, &text)
                    .await
            }
            Route::SecureChannel { recipient } => {
                debug!("Dispatching to Signal recipient {}", recipient);
                self.secure.send_message(&recipient, &text).await
            }
            Route::NativeChat(chat) => {
                debug!("Dispatching to Telegram chat {} ({})", chat, mode);
                let text = collapse_spaces(&text);
                let options = SendOptions {
                    parse_mode: Some(mode),
                    ..options
                };
                self.chat.send_message(&chat, &text, &options).await
            }
        }
    }

    /// Send to the chat an incoming message came from.
    pub async fn reply(
        &self,
        ctx: &IncomingMessage,
        text: &str,
        options: SendOptions,
    ) -> Result<()> {
        self.send(ctx.chat_id.clone(), text, options).await
    }

    /// Relay a user's message into the staff chat, labelled with the id staff
    /// can answer to.
    pub async fn forward_to_staff(&self, incoming: &IncomingMessage) -> Result<()> {
        let staffchat_id = self.settings().staffchat_id;
        let text = format!(
            "{} ({}): {}",
            incoming.user_name, incoming.chat_id, incoming.text
        );
        self.send(staffchat_id, &text, SendOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{settings, Recorder};

    #[test]
    fn test_resolve_web() {
        let staff = RecipientId::Numeric(42);
        assert_eq!(
            Route::resolve("WEB123".into(), &staff),
            Route::Socket {
                session_id: "123".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_signal() {
        let staff = RecipientId::Numeric(42);
        assert_eq!(
            Route::resolve("SIGNAL+15550001111".into(), &staff),
            Route::SecureChannel {
                recipient: "+15550001111".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_tag_anywhere_uses_first_occurrence() {
        let staff = RecipientId::Numeric(42);
        assert_eq!(
            Route::resolve("xWEBabcWEBdef".into(), &staff),
            Route::Socket {
                session_id: "abcWEBdef".to_string()
            }
        );
        // WEB wins over SIGNAL
        assert_eq!(
            Route::resolve("SIGNALWEB7".into(), &staff),
            Route::Socket {
                session_id: "7".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_staff_chat_is_never_tagged() {
        let staff = RecipientId::Text("WEBstaff".to_string());
        assert_eq!(
            Route::resolve("WEBstaff".into(), &staff),
            Route::NativeChat(RecipientId::Text("WEBstaff".to_string()))
        );
    }

    #[test]
    fn test_resolve_staff_equality_is_strict() {
        let staff = RecipientId::Numeric(42);
        assert_eq!(
            Route::resolve("WEB42".into(), &staff),
            Route::Socket {
                session_id: "42".to_string()
            }
        );
        assert_eq!(
            Route::resolve(RecipientId::Numeric(42), &staff),
            Route::NativeChat(RecipientId::Numeric(42))
        );
    }

    #[test]
    fn test_recipient_parse() {
        assert_eq!(RecipientId::parse("555"), RecipientId::Numeric(555));
        assert_eq!(RecipientId::parse("-100123"), RecipientId::Numeric(-100123));
        assert_eq!(
            RecipientId::parse("WEB123"),
            RecipientId::Text("WEB123".to_string())
        );
    }

    #[tokio::test]
    async fn test_send_web_emits_to_session_only() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send("WEB123", "hi", SendOptions::default())
            .await
            .unwrap();

        let emitted = recorder.emitted.lock().await;
        assert_eq!(
            *emitted,
            vec![("123".to_string(), STAFF_EVENT.to_string(), "hi".to_string())]
        );
        assert!(recorder.chat_sent.lock().await.is_empty());
        assert!(recorder.secure_sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_signal_forwards_to_secure_channel() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send("SIGNAL789", "hi", SendOptions::default())
            .await
            .unwrap();

        let sent = recorder.secure_sent.lock().await;
        assert_eq!(*sent, vec![("789".to_string(), "hi".to_string())]);
        assert!(recorder.chat_sent.lock().await.is_empty());
        assert!(recorder.emitted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_staff_chat_goes_native() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send(42_i64, "hi", SendOptions::default())
            .await
            .unwrap();

        let sent = recorder.chat_sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, RecipientId::Numeric(42));
        assert_eq!(sent[0].1, "hi");
    }

    #[tokio::test]
    async fn test_send_native_collapses_spaces() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send(555_i64, "a   b", SendOptions::default())
            .await
            .unwrap();

        let sent = recorder.chat_sent.lock().await;
        assert_eq!(sent[0].0, RecipientId::Numeric(555));
        assert_eq!(sent[0].1, "a b");
        assert_eq!(sent[0].2.parse_mode, Some(MarkupMode::Html));
    }

    #[tokio::test]
    async fn test_send_web_keeps_spaces() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send("WEB1", "a   b", SendOptions::default())
            .await
            .unwrap();
        dispatcher
            .send("SIGNAL2", "c   d", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(recorder.emitted.lock().await[0].2, "a   b");
        assert_eq!(recorder.secure_sent.lock().await[0].1, "c   d");
    }

    #[tokio::test]
    async fn test_send_tagged_staff_lookalike_uses_socket() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send("WEB42", "x", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(recorder.emitted.lock().await[0].0, "42");
        assert!(recorder.chat_sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_text_is_escaped_on_every_route() {
        let (recorder, dispatcher, _tx) =
            Recorder::dispatcher(settings(MarkupMode::MarkdownV2, 42));

        dispatcher
            .send("WEB1", "v1.0!", SendOptions::default())
            .await
            .unwrap();
        dispatcher
            .send("SIGNAL2", "v1.0!", SendOptions::default())
            .await
            .unwrap();
        dispatcher
            .send(3_i64, "v1.0!", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(recorder.emitted.lock().await[0].2, "v1\\.0\\!");
        assert_eq!(recorder.secure_sent.lock().await[0].1, "v1\\.0\\!");
        assert_eq!(recorder.chat_sent.lock().await[0].1, "v1\\.0\\!");
    }

    #[tokio::test]
    async fn test_options_override_configured_mode() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        let options = SendOptions {
            disable_notification: true,
            ..SendOptions::default()
        }
        .with_parse_mode(MarkupMode::MarkdownV2);
        dispatcher.send(7_i64, "<b>.</b>", options).await.unwrap();

        let sent = recorder.chat_sent.lock().await;
        assert_eq!(sent[0].1, "<b\\>\\.</b\\>");
        assert_eq!(sent[0].2.parse_mode, Some(MarkupMode::MarkdownV2));
        assert!(sent[0].2.disable_notification);
    }

    #[tokio::test]
    async fn test_mode_changes_are_seen_between_calls() {
        let (recorder, dispatcher, tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));

        dispatcher
            .send(7_i64, "<x>", SendOptions::default())
            .await
            .unwrap();
        tx.send_modify(|s| s.parse_mode = MarkupMode::PlainText);
        dispatcher
            .send(7_i64, "<x>", SendOptions::default())
            .await
            .unwrap();

        let sent = recorder.chat_sent.lock().await;
        assert_eq!(sent[0].1, "&lt;x&gt;");
        assert_eq!(sent[1].1, "<x>");
        assert_eq!(sent[1].2.parse_mode, Some(MarkupMode::PlainText));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));
        *recorder.fail.lock().await = true;

        assert!(dispatcher
            .send("SIGNAL1", "hi", SendOptions::default())
            .await
            .is_err());
        assert!(dispatcher
            .send(5_i64, "hi", SendOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reply_uses_incoming_chat() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));
        let incoming = IncomingMessage {
            platform: "web".to_string(),
            user_id: "abc".to_string(),
            chat_id: RecipientId::Text("WEBabc".to_string()),
            user_name: "Guest".to_string(),
            text: "hello".to_string(),
        };

        dispatcher
            .reply(&incoming, "welcome", SendOptions::default())
            .await
            .unwrap();

        assert_eq!(recorder.emitted.lock().await[0].0, "abc");
    }

    #[tokio::test]
    async fn test_forward_to_staff() {
        let (recorder, dispatcher, _tx) = Recorder::dispatcher(settings(MarkupMode::Html, 42));
        let incoming = IncomingMessage {
            platform: "telegram".to_string(),
            user_id: "555".to_string(),
            chat_id: RecipientId::Numeric(555),
            user_name: "Ann".to_string(),
            text: "need help".to_string(),
        };

        dispatcher.forward_to_staff(&incoming).await.unwrap();

        let sent = recorder.chat_sent.lock().await;
        assert_eq!(sent[0].0, RecipientId::Numeric(42));
        assert_eq!(sent[0].1, "Ann (555): need help");
    }
}
