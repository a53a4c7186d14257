use chrono::{DateTime, FixedOffset};

use crate::config::ChatConfig;
use crate::message::MessageMetadata;

/// Date bucket format used for folders and the query API.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Result of resolving a chat against the configured allow-list and aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub trackable: bool,
    pub metadata: MessageMetadata,
}

/// Resolve trackability, folder name and date bucket for a chat.
///
/// `chats` of `None` or an empty list tracks every chat. The first entry
/// whose id matches exactly supplies the alias; an empty alias falls back
/// to the raw chat id.
pub fn resolve(
    chat_id: &str,
    timestamp: DateTime<FixedOffset>,
    chats: Option<&[ChatConfig]>,
) -> Resolution {
    let entries = chats.unwrap_or_default();
    let matched = entries.iter().find(|c| c.id == chat_id);

    let trackable = entries.is_empty() || matched.is_some();
    let folder = matched
        .and_then(|c| c.alias.as_deref())
        .filter(|alias| !alias.is_empty())
        .unwrap_or(chat_id)
        .to_string();

    Resolution {
        trackable,
        metadata: MessageMetadata {
            folder,
            date: timestamp.format(DATE_FORMAT).to_string(),
            timestamp,
        },
    }
}
