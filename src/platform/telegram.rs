use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, error, info, warn};

use crate::message::{AttachmentKind, InboundEvent, MediaRef};
use crate::pipeline::{MediaDownloader, Pipeline};

const PHOTO_MIME: &str = "image/jpeg";
const VOICE_MIME: &str = "audio/ogg";
const DEFAULT_MIME: &str = "application/octet-stream";

/// Downloads attachment bytes through the Bot API
pub struct TelegramMedia {
    bot: Bot,
}

impl TelegramMedia {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MediaDownloader for TelegramMedia {
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .with_context(|| format!("Failed to look up file {}", media.file_id))?;

        let mut bytes = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .with_context(|| format!("Failed to download file {}", media.file_id))?;
        Ok(bytes)
    }
}

fn media_refs(msg: &Message) -> Vec<MediaRef> {
    let mut media = Vec::new();

    // Telegram lists photo sizes smallest first
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        media.push(MediaRef {
            kind: AttachmentKind::Image,
            mime_type: PHOTO_MIME.to_string(),
            file_id: largest.file.id.0.clone(),
        });
    }
    if let Some(voice) = msg.voice() {
        media.push(MediaRef {
            kind: AttachmentKind::Audio,
            mime_type: VOICE_MIME.to_string(),
            file_id: voice.file.id.0.clone(),
        });
    }
    if let Some(document) = msg.document() {
        let mime_type = document
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());
        let kind = if mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::Document
        };
        media.push(MediaRef {
            kind,
            mime_type,
            file_id: document.file.id.0.clone(),
        });
    }

    media
}

/// Convert a Bot API message into a platform-neutral event
pub fn to_event(msg: &Message) -> InboundEvent {
    let sender = msg
        .from
        .as_ref()
        .map(|user| user.id.0.to_string())
        .unwrap_or_else(|| msg.chat.id.0.to_string());
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();

    InboundEvent {
        // Bot API message ids are only unique within a chat
        message_id: format!("{}_{}", msg.chat.id.0, msg.id.0),
        sender,
        chat: msg.chat.id.0.to_string(),
        text: text.to_string(),
        timestamp: msg.date.fixed_offset(),
        media: media_refs(msg),
    }
}

/// Run the Telegram update loop, feeding every message into the pipeline
pub async fn run(bot: Bot, pipeline: Arc<Pipeline>) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    let event = to_event(&msg);
    let id = event.message_id.clone();

    match pipeline.handle(event).await {
        Ok(disposition) => debug!("Message {} handled: {:?}", id, disposition),
        Err(e) => error!("Failed to process message {}: {:#}", id, e),
    }

    Ok(())
}
