use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// URL prefix under which the storage root is served.
pub const FILE_WEB_PATH_PREFIX: &str = "/files";

/// String form of message timestamps, as stored and sent to sinks.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Derived, non-authoritative facts about a message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageMetadata {
    pub folder: String,
    pub date: String,
    pub timestamp: DateTime<FixedOffset>,
}

/// Canonical record of one inbound message, shared by every sink.
///
/// Identity, content, timestamp and files are fixed at construction. Sinks
/// can only add enrichment output via [`TrackableMessage::append_parsed_content`].
#[derive(Debug, Clone, Serialize)]
pub struct TrackableMessage {
    id: String,
    sender: String,
    chat: String,
    content: String,
    parsed_content: String,
    timestamp: String,
    files: Vec<PathBuf>,
    metadata: MessageMetadata,
}

impl TrackableMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        chat: impl Into<String>,
        content: impl Into<String>,
        files: Vec<PathBuf>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            chat: chat.into(),
            content: content.into(),
            parsed_content: String::new(),
            timestamp: metadata.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            files,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn chat(&self) -> &str {
        &self.chat
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn parsed_content(&self) -> &str {
        &self.parsed_content
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    pub fn append_parsed_content(&mut self, text: &str) {
        self.parsed_content.push_str(text);
    }
}

/// Kind of media carried by an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Audio,
    Document,
}

/// Reference to media that the protocol client can download on demand.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub file_id: String,
}

/// A decoded message event handed over by the protocol client.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message_id: String,
    pub sender: String,
    pub chat: String,
    pub text: String,
    pub timestamp: DateTime<FixedOffset>,
    pub media: Vec<MediaRef>,
}

/// Redacted view of a message for the live feed and the query API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LiveMessage {
    pub id: String,
    pub sender: String,
    pub chat: String,
    pub content: String,
    pub timestamp: String,
    pub filename: Option<String>,
}

impl LiveMessage {
    pub fn from_message(message: &TrackableMessage, storage_root: &Path) -> Self {
        Self {
            id: message.id.clone(),
            sender: message.sender.clone(),
            chat: message.chat.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.clone(),
            filename: message
                .files
                .first()
                .map(|path| public_file_path(path, storage_root)),
        }
    }
}

/// Map a local attachment path to the URL it is served under.
pub fn public_file_path(local: &Path, storage_root: &Path) -> String {
    let relative = local.strip_prefix(storage_root).unwrap_or(local);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("{}/{}", FILE_WEB_PATH_PREFIX, parts.join("/"))
}
