use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{ChatApi, IncomingMessage};
use crate::config::Settings;
use crate::dispatch::{MessageDispatcher, RecipientId, SendOptions};
use crate::markup::MarkupMode;

const GREETING: &str = "Hello! Send a message here and our staff will get back to you.";

const REPLY_USAGE: &str = "Usage: /reply <recipient> <text>";

/// Map a recipient to Telegram's addressing: numbers are chat ids, anything
/// else is a public `@username`.
pub fn telegram_recipient(chat: &RecipientId) -> Recipient {
    match chat {
        RecipientId::Numeric(id) => Recipient::Id(ChatId(*id)),
        RecipientId::Text(s) => match s.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => Recipient::ChannelUsername(s.clone()),
        },
    }
}

/// `None` means no parse mode is sent and the text renders verbatim.
#[allow(deprecated)]
pub fn telegram_parse_mode(mode: MarkupMode) -> Option<ParseMode> {
    match mode {
        MarkupMode::PlainText => None,
        MarkupMode::Markdown => Some(ParseMode::Markdown),
        MarkupMode::MarkdownV2 => Some(ParseMode::MarkdownV2),
        MarkupMode::Html => Some(ParseMode::Html),
    }
}

#[async_trait]
impl ChatApi for Bot {
    async fn send_message(
        &self,
        chat: &RecipientId,
        text: &str,
        options: &SendOptions,
    ) -> Result<()> {
        let mut request = Requester::send_message(self, telegram_recipient(chat), text.to_string());
        if let Some(mode) = options.parse_mode.and_then(telegram_parse_mode) {
            request = request.parse_mode(mode);
        }
        if options.disable_notification {
            request = request.disable_notification(true);
        }
        if options.protect_content {
            request = request.protect_content(true);
        }
        request.await?;
        Ok(())
    }
}

/// Run the Telegram bot platform
pub async fn run(
    bot: Bot,
    dispatcher: Arc<MessageDispatcher>,
    settings: Arc<watch::Sender<Settings>>,
) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher, settings])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    msg: Message,
    dispatcher: Arc<MessageDispatcher>,
    settings: Arc<watch::Sender<Settings>>,
) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };
    let (user_id, user_name) = match msg.from.as_ref() {
        Some(user) => (user.id.0.to_string(), user.first_name.clone()),
        None => (String::new(), String::new()),
    };

    let incoming = IncomingMessage {
        platform: "telegram".to_string(),
        user_id,
        chat_id: RecipientId::Numeric(msg.chat.id.0),
        user_name,
        text,
    };

    info!(
        "Telegram message from {} ({}): {}",
        incoming.user_name, incoming.chat_id, incoming.text
    );

    if let Err(e) = handle_incoming(&dispatcher, &settings, &incoming).await {
        error!("Error handling message from {}: {:#}", incoming.chat_id, e);
    }

    Ok(())
}

/// Split `/command@botname args` into the bare command and its arguments.
fn split_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (rest, ""),
    };
    let command = word.split('@').next().unwrap_or(word);
    Some((command, args))
}

async fn handle_incoming(
    dispatcher: &MessageDispatcher,
    settings: &watch::Sender<Settings>,
    incoming: &IncomingMessage,
) -> Result<()> {
    let is_staff = incoming.chat_id == settings.borrow().staffchat_id;

    match split_command(&incoming.text) {
        Some(("start", _)) => {
            dispatcher
                .reply(incoming, GREETING, SendOptions::default())
                .await
        }
        Some(("id", _)) => {
            let text = format!("This chat's id is {}", incoming.chat_id);
            dispatcher.reply(incoming, &text, SendOptions::default()).await
        }
        Some(("reply", args)) if is_staff => {
            let Some((recipient, body)) = args.split_once(char::is_whitespace) else {
                return dispatcher
                    .reply(incoming, REPLY_USAGE, SendOptions::default())
                    .await;
            };
            dispatcher
                .send(RecipientId::parse(recipient), body.trim(), SendOptions::default())
                .await
        }
        Some(("parsemode", args)) if is_staff => {
            let text = match args.parse::<MarkupMode>() {
                Ok(mode) => {
                    settings.send_modify(|s| s.parse_mode = mode);
                    info!("Parse mode switched to {}", mode);
                    format!("Parse mode set to {}", mode)
                }
                Err(e) => e.to_string(),
            };
            dispatcher.reply(incoming, &text, SendOptions::default()).await
        }
        // Staff chatter stays in the staff chat.
        _ if is_staff => Ok(()),
        _ => dispatcher.forward_to_staff(incoming).await,
    }
}
