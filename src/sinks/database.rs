use anyhow::Result;
use async_trait::async_trait;

use super::Sink;
use crate::config::Config;
use crate::message::TrackableMessage;
use crate::store::MessageStore;

/// Persists messages and file references to the SQLite store
pub struct DatabaseSink {
    store: MessageStore,
}

impl DatabaseSink {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Sink for DatabaseSink {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn init(&mut self, _config: &Config) -> Result<()> {
        self.store.migrate().await
    }

    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
        self.store.save_message(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::fixtures::sample_message;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_tracked_message_is_queryable() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut sink = DatabaseSink::new(store.clone());
        sink.init(&Config::default()).await.unwrap();

        let mut msg = sample_message("m1", vec![]);
        msg.append_parsed_content("extracted");
        sink.track_message(&mut msg).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let found = store.query_messages(day, day, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m1");
        assert_eq!(found[0].sender, "sender-1");
        assert_eq!(found[0].chat, "c1");
    }

    #[tokio::test]
    async fn test_track_without_init_fails() {
        let sink = DatabaseSink::new(MessageStore::open_in_memory().unwrap());
        let mut msg = sample_message("m1", vec![]);
        assert!(sink.track_message(&mut msg).await.is_err());
    }
}
