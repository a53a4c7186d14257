pub mod cloud;
pub mod csv;
pub mod database;
pub mod ocr;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::message::TrackableMessage;
use crate::store::MessageStore;

/// A destination that durably records or forwards every tracked message.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identity used in logs
    fn name(&self) -> &'static str;

    /// Prepare the sink. A failure excludes the sink for the rest of the run.
    async fn init(&mut self, config: &Config) -> Result<()>;

    /// Record one message. Only enrichment sinks touch `parsed_content`.
    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()>;
}

/// Build the ordered sink list for a configuration.
///
/// The OCR sink goes first since it fills `parsed_content`, which the
/// database and CSV sinks persist. The rest follow in a fixed order:
/// database, CSV, webhook, Google Cloud.
pub fn build_sinks(config: &Config, store: MessageStore) -> Vec<Box<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if config.ocr.enabled {
        sinks.push(Box::new(ocr::OcrSink::new()));
    }
    sinks.push(Box::new(database::DatabaseSink::new(store)));
    if config.csv.enabled {
        sinks.push(Box::new(csv::CsvSink::new()));
    }
    if config.webhook.enabled {
        sinks.push(Box::new(webhook::WebhookSink::new()));
    }
    if config.google_cloud.enabled {
        sinks.push(Box::new(cloud::CloudSink::new()));
    }

    sinks
}

/// Fans every message out to the sinks that initialised successfully.
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    /// Initialise sinks in order, keeping only those whose `init` succeeds.
    pub async fn start(config: &Config, sinks: Vec<Box<dyn Sink>>) -> Self {
        let mut active = Vec::with_capacity(sinks.len());
        for mut sink in sinks {
            match sink.init(config).await {
                Ok(()) => {
                    info!("Sink '{}' initialized", sink.name());
                    active.push(sink);
                }
                Err(e) => {
                    error!("Failed to initialize sink '{}', disabling it: {:#}", sink.name(), e);
                }
            }
        }

        let dispatcher = Self { sinks: active };
        info!("Active sinks (in dispatch order): {:?}", dispatcher.sink_names());
        dispatcher
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Hand the message to every sink in order. Failures are logged per sink
    /// and never stop the remaining sinks.
    pub async fn dispatch(&self, message: &mut TrackableMessage) {
        for sink in &self.sinks {
            debug!("Processing message {} with sink '{}'", message.id(), sink.name());
            if let Err(e) = sink.track_message(message).await {
                error!(
                    "Failed to store message {} in sink '{}': {:#}",
                    message.id(),
                    sink.name(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records a snapshot of every message it receives.
    pub(crate) struct RecordingSink {
        pub name: &'static str,
        pub seen: Arc<Mutex<Vec<TrackableMessage>>>,
        pub fail_init: bool,
        pub fail_track: bool,
        pub enrich: Option<&'static str>,
    }

    impl RecordingSink {
        pub(crate) fn new(name: &'static str) -> (Self, Arc<Mutex<Vec<TrackableMessage>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name,
                    seen: Arc::clone(&seen),
                    fail_init: false,
                    fail_track: false,
                    enrich: None,
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn init(&mut self, _config: &Config) -> Result<()> {
            if self.fail_init {
                anyhow::bail!("init refused");
            }
            Ok(())
        }

        async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
            if let Some(text) = self.enrich {
                message.append_parsed_content(text);
            }
            self.seen.lock().unwrap().push(message.clone());
            if self.fail_track {
                anyhow::bail!("track refused");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::message::fixtures::sample_message;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_build_sinks_default_is_database_only() {
        let config = Config::default();
        let sinks = build_sinks(&config, MessageStore::open_in_memory().unwrap());
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["database"]);
    }

    #[tokio::test]
    async fn test_build_sinks_order_with_everything_enabled() {
        let mut config = Config::default();
        config.ocr.enabled = true;
        config.csv.enabled = true;
        config.webhook.enabled = true;
        config.google_cloud.enabled = true;

        let sinks = build_sinks(&config, MessageStore::open_in_memory().unwrap());
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["ocr", "database", "csv", "webhook", "google_cloud"]);
    }

    #[tokio::test]
    async fn test_failed_init_excludes_sink() {
        let (first, _) = RecordingSink::new("first");
        let (mut broken, broken_seen) = RecordingSink::new("broken");
        broken.fail_init = true;
        let (last, last_seen) = RecordingSink::new("last");

        let dispatcher = Dispatcher::start(
            &Config::default(),
            vec![Box::new(first), Box::new(broken), Box::new(last)],
        )
        .await;
        assert_eq!(dispatcher.sink_names(), vec!["first", "last"]);

        let mut msg = sample_message("m1", vec![]);
        dispatcher.dispatch(&mut msg).await;
        assert!(broken_seen.lock().unwrap().is_empty());
        assert_eq!(last_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let (mut enricher, _) = RecordingSink::new("enricher");
        enricher.enrich = Some("ocr text");
        let (mut failing, failing_seen) = RecordingSink::new("failing");
        failing.fail_track = true;
        let (after, after_seen) = RecordingSink::new("after");

        let dispatcher = Dispatcher::start(
            &Config::default(),
            vec![Box::new(enricher), Box::new(failing), Box::new(after)],
        )
        .await;

        let files = vec![PathBuf::from("fs/Family/05.03.2024/m1.jpg")];
        let mut msg = sample_message("m1", files.clone());
        dispatcher.dispatch(&mut msg).await;

        assert_eq!(failing_seen.lock().unwrap().len(), 1);
        let after_seen = after_seen.lock().unwrap();
        assert_eq!(after_seen.len(), 1);
        let received = &after_seen[0];
        assert_eq!(received.id(), "m1");
        assert_eq!(received.content(), "hello there");
        assert_eq!(received.timestamp(), msg.timestamp());
        assert_eq!(received.files(), files.as_slice());
        assert_eq!(received.parsed_content(), "ocr text");
    }
}
