use anyhow::{Context, Result};
use chrono::NaiveDate;
use uuid::Uuid;

use super::MessageStore;
use crate::message::TrackableMessage;

/// A message row as returned by the query API, with its first file path
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub chat: String,
    pub content: String,
    pub timestamp: String,
    pub path: Option<String>,
}

impl MessageStore {
    /// Insert a message and one row per attached file
    pub async fn save_message(&self, message: &TrackableMessage) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO messages (id, sender, chat, content, parsed_content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                message.id(),
                message.sender(),
                message.chat(),
                message.content(),
                message.parsed_content(),
                message.timestamp(),
            ],
        )
        .with_context(|| format!("Failed to insert message {}", message.id()))?;

        for file in message.files() {
            conn.execute(
                "INSERT INTO files (id, path, message_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    file.to_string_lossy().into_owned(),
                    message.id(),
                ],
            )
            .with_context(|| format!("Failed to insert file {}", file.display()))?;
        }

        Ok(())
    }

    /// Distinct chat ids that have stored messages
    pub async fn list_chats(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT DISTINCT chat FROM messages ORDER BY chat")?;
        let chats = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to list chats")?;
        Ok(chats)
    }

    /// File paths stored for a message, in insertion order
    #[cfg(test)]
    pub async fn files_for_message(&self, message_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT path FROM files WHERE message_id = ?1 ORDER BY rowid")?;
        let files = stmt
            .query_map(rusqlite::params![message_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to load files")?;
        Ok(files)
    }

    /// Messages whose date falls within `from..=to`, newest first.
    /// A non-empty `content` filter matches case-insensitive substrings,
    /// folded with Unicode lowercasing.
    pub async fn query_messages(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        content: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            "SELECT m.id, m.sender, m.chat, m.content, m.timestamp,
                    (SELECT f.path FROM files f WHERE f.message_id = m.id
                     ORDER BY f.rowid LIMIT 1) AS path
             FROM messages m
             WHERE substr(m.timestamp, 1, 10) >= ?1
               AND substr(m.timestamp, 1, 10) <= ?2
             ORDER BY m.timestamp DESC",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    from.format("%Y-%m-%d").to_string(),
                    to.format("%Y-%m-%d").to_string(),
                ],
                |row| {
                    Ok(StoredMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        chat: row.get(2)?,
                        content: row.get(3)?,
                        timestamp: row.get(4)?,
                        path: row.get(5)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query messages")?;

        // SQLite lower() only folds ASCII, so the substring match runs here
        let messages = match content.filter(|c| !c.is_empty()) {
            Some(filter) => {
                let needle = filter.to_lowercase();
                rows.into_iter()
                    .filter(|m| m.content.to_lowercase().contains(&needle))
                    .collect()
            }
            None => rows,
        };

        Ok(messages)
    }
}
