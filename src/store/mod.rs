pub mod messages;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use messages::StoredMessage;

/// Thread-safe SQLite store for tracked messages and their files
#[derive(Clone)]
pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl MessageStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        info!("Message store opened at: {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create tables if needed and bring older databases up to date.
    pub async fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        run_migrations(&conn)
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            sender TEXT,
            chat TEXT,
            content TEXT,
            parsed_content TEXT,
            timestamp TEXT
        );

        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            path TEXT,
            message_id TEXT,
            FOREIGN KEY (message_id) REFERENCES messages(id)
        );

        CREATE INDEX IF NOT EXISTS idx_files_message
            ON files(message_id);
        ",
    )
    .context("Failed to create message tables")?;

    // Databases created before enrichment existed lack parsed_content
    let has_parsed_content = conn
        .prepare("SELECT parsed_content FROM messages LIMIT 1")
        .is_ok();
    if !has_parsed_content {
        conn.execute_batch("ALTER TABLE messages ADD COLUMN parsed_content TEXT DEFAULT ''")
            .context("Failed to add parsed_content column")?;
        info!("Added parsed_content column to messages table");
    }

    Ok(())
}
