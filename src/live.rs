use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::message::{LiveMessage, TrackableMessage};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half of a live feed connection
#[async_trait]
pub trait FeedWriter: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
}

#[async_trait]
impl FeedWriter for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

/// Pushes every tracked message to the connected live feed clients.
///
/// Writes happen under the connection-set lock, one at a time, so frames
/// are never interleaved. A connection whose write fails or does not finish
/// within the write timeout is dropped, so one stalled client holds up a
/// publish (and subscribe/unsubscribe) for at most that long.
pub struct LiveBroadcaster {
    storage_root: PathBuf,
    write_timeout: Duration,
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, Box<dyn FeedWriter>>>,
}

impl LiveBroadcaster {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            write_timeout: WRITE_TIMEOUT,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub async fn subscribe(&self, writer: Box<dyn FeedWriter>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.lock().await;
        connections.insert(id, writer);
        info!("Live feed client {} connected ({} total)", id, connections.len());
        id
    }

    pub async fn unsubscribe(&self, id: u64) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&id).is_some() {
            info!("Live feed client {} disconnected ({} total)", id, connections.len());
        }
    }

    #[cfg(test)]
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn publish(&self, message: &TrackableMessage) {
        let live = LiveMessage::from_message(message, &self.storage_root);
        let text = match serde_json::to_string(&live) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize live message {}: {}", message.id(), e);
                return;
            }
        };

        let mut connections = self.connections.lock().await;
        let mut failed = Vec::new();
        for (id, writer) in connections.iter_mut() {
            match tokio::time::timeout(self.write_timeout, writer.send_text(text.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Dropping live feed client {}: {:#}", id, e);
                    failed.push(*id);
                }
                Err(_) => {
                    warn!("Dropping live feed client {}: write timed out", id);
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            connections.remove(&id);
        }
        debug!("Published message {} to {} client(s)", message.id(), connections.len());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;

    /// Feed writer backed by a channel; fails once the receiver is dropped
    pub(crate) struct ChannelWriter(pub mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FeedWriter for ChannelWriter {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.0
                .send(text)
                .map_err(|_| anyhow::anyhow!("client went away"))
        }
    }

    /// Feed writer whose sends never complete
    pub(crate) struct StalledWriter;

    #[async_trait]
    impl FeedWriter for StalledWriter {
        async fn send_text(&mut self, _text: String) -> Result<()> {
            std::future::pending().await
        }
    }

    pub(crate) fn channel_writer() -> (Box<dyn FeedWriter>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(ChannelWriter(tx)), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{channel_writer, StalledWriter};
    use super::*;
    use crate::message::fixtures::sample_message;

    #[tokio::test]
    async fn test_every_client_receives_the_message() {
        let live = LiveBroadcaster::new("file-storage");
        let (a, mut rx_a) = channel_writer();
        let (b, mut rx_b) = channel_writer();
        live.subscribe(a).await;
        live.subscribe(b).await;

        live.publish(&sample_message("m1", vec![])).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["id"], "m1");
            assert_eq!(frame["sender"], "sender-1");
            assert!(frame["filename"].is_null());
        }
    }

    #[tokio::test]
    async fn test_failed_client_is_removed() {
        let live = LiveBroadcaster::new("file-storage");
        let (alive, mut rx_alive) = channel_writer();
        let (gone, rx_gone) = channel_writer();
        live.subscribe(alive).await;
        live.subscribe(gone).await;
        drop(rx_gone);

        live.publish(&sample_message("m1", vec![])).await;
        assert_eq!(live.connection_count().await, 1);
        assert!(rx_alive.recv().await.is_some());

        live.publish(&sample_message("m2", vec![])).await;
        let frame: serde_json::Value =
            serde_json::from_str(&rx_alive.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], "m2");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let live = LiveBroadcaster::new("file-storage");
        let (writer, mut rx) = channel_writer();
        let id = live.subscribe(writer).await;
        live.unsubscribe(id).await;

        live.publish(&sample_message("m1", vec![])).await;
        assert_eq!(live.connection_count().await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_filename_is_public_path() {
        let live = LiveBroadcaster::new("file-storage");
        let (writer, mut rx) = channel_writer();
        live.subscribe(writer).await;

        let file = PathBuf::from("file-storage/Family/05.03.2024/m1.jpg");
        live.publish(&sample_message("m1", vec![file])).await;

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["filename"], "/files/Family/05.03.2024/m1.jpg");
    }

    #[tokio::test]
    async fn test_stalled_client_is_dropped_after_timeout() {
        let live =
            LiveBroadcaster::new("file-storage").with_write_timeout(Duration::from_millis(50));
        let (alive, mut rx_alive) = channel_writer();
        live.subscribe(Box::new(StalledWriter)).await;
        live.subscribe(alive).await;

        tokio::time::timeout(
            Duration::from_secs(5),
            live.publish(&sample_message("m1", vec![])),
        )
        .await
        .expect("publish blocked on a stalled client");

        assert_eq!(live.connection_count().await, 1);
        let frame: serde_json::Value =
            serde_json::from_str(&rx_alive.recv().await.unwrap()).unwrap();
        assert_eq!(frame["id"], "m1");
    }
}
