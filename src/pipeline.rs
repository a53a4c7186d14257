use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::attachments::AttachmentStager;
use crate::config::Config;
use crate::live::LiveBroadcaster;
use crate::message::{InboundEvent, MediaRef, TrackableMessage};
use crate::metadata;
use crate::sinks::Dispatcher;

/// Fetches attachment bytes from the messaging platform
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>>;
}

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Tracked,
    /// The chat is not in the allow-list
    Untracked,
    /// No text and no attachments
    Empty,
}

/// Composition root: resolve, stage, dispatch, then broadcast.
pub struct Pipeline {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    stager: AttachmentStager,
    live: Arc<LiveBroadcaster>,
    downloader: Arc<dyn MediaDownloader>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        stager: AttachmentStager,
        live: Arc<LiveBroadcaster>,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            stager,
            live,
            downloader,
        }
    }

    /// Process one event. An error means an attachment could not be
    /// fetched or staged, and no sink saw the message.
    pub async fn handle(&self, event: InboundEvent) -> Result<Disposition> {
        let resolution =
            metadata::resolve(&event.chat, event.timestamp, self.config.chats.as_deref());
        if !resolution.trackable {
            debug!("Ignoring message {} from untracked chat {}", event.message_id, event.chat);
            return Ok(Disposition::Untracked);
        }
        let meta = resolution.metadata;

        let mut files = Vec::with_capacity(event.media.len());
        for media in &event.media {
            let bytes = self
                .downloader
                .download(media)
                .await
                .with_context(|| {
                    format!("Failed to download attachment of message {}", event.message_id)
                })?;
            let path = self
                .stager
                .stage(
                    &meta.folder,
                    &meta.date,
                    &event.message_id,
                    media.kind,
                    &media.mime_type,
                    &bytes,
                )
                .await?;
            files.push(path);
        }

        if event.text.is_empty() && files.is_empty() {
            debug!("Skipping empty message {}", event.message_id);
            return Ok(Disposition::Empty);
        }

        let mut message = TrackableMessage::new(
            event.message_id,
            event.sender,
            event.chat,
            event.text,
            files,
            meta,
        );
        info!(
            "Tracking message {} in '{}' ({} file(s))",
            message.id(),
            message.metadata().folder,
            message.files().len()
        );

        self.dispatcher.dispatch(&mut message).await;
        self.live.publish(&message).await;
        Ok(Disposition::Tracked)
    }
}
