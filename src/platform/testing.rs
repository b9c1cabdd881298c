//! Recording transports for dispatcher tests.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use super::{ChatApi, SecureMessenger, SocketLayer};
use crate::config::Settings;
use crate::dispatch::{MessageDispatcher, RecipientId, SendOptions};
use crate::markup::MarkupMode;

pub fn settings(parse_mode: MarkupMode, staffchat_id: i64) -> Settings {
    Settings {
        parse_mode,
        staffchat_id: RecipientId::Numeric(staffchat_id),
    }
}

/// Captures everything sent through each transport.
#[derive(Default)]
pub struct Recorder {
    pub chat_sent: Mutex<Vec<(RecipientId, String, SendOptions)>>,
    pub emitted: Mutex<Vec<(String, String, String)>>,
    pub secure_sent: Mutex<Vec<(String, String)>>,
    /// When set, every transport call fails.
    pub fail: Mutex<bool>,
}

impl Recorder {
    /// A dispatcher whose three transports all record into one `Recorder`.
    pub fn dispatcher(
        initial: Settings,
    ) -> (Arc<Recorder>, MessageDispatcher, watch::Sender<Settings>) {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(initial);
        let dispatcher = MessageDispatcher::new(
            rx,
            recorder.clone(),
            recorder.clone(),
            recorder.clone(),
        );
        (recorder, dispatcher, tx)
    }

    async fn check(&self) -> Result<()> {
        if *self.fail.lock().await {
            bail!("transport unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for Recorder {
    async fn send_message(
        &self,
        chat: &RecipientId,
        text: &str,
        options: &SendOptions,
    ) -> Result<()> {
        self.check().await?;
        self.chat_sent
            .lock()
            .await
            .push((chat.clone(), text.to_string(), options.clone()));
        Ok(())
    }
}

#[async_trait]
impl SocketLayer for Recorder {
    async fn emit_to_session(&self, session_id: &str, event: &str, payload: &str) -> Result<()> {
        self.check().await?;
        self.emitted.lock().await.push((
            session_id.to_string(),
            event.to_string(),
            payload.to_string(),
        ));
        Ok(())
    }
}

#[async_trait]
impl SecureMessenger for Recorder {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
        self.check().await?;
        self.secure_sent
            .lock()
            .await
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}
