use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Sink;
use crate::config::Config;
use crate::message::TrackableMessage;

const CSV_FILE_NAME: &str = "messages.csv";

/// Appends one CSV record per message under `{path}/{folder}/{date}/messages.csv`
pub struct CsvSink {
    root: PathBuf,
}

impl CsvSink {
    pub fn new() -> Self {
        Self {
            root: PathBuf::new(),
        }
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn record_for(message: &TrackableMessage) -> Vec<String> {
    let mut record = vec![
        message.id().to_string(),
        message.sender().to_string(),
        message.chat().to_string(),
        flatten(message.content()),
        flatten(message.parsed_content()),
        message.timestamp().to_string(),
    ];
    record.extend(
        message
            .files()
            .iter()
            .map(|f| f.to_string_lossy().into_owned()),
    );
    record
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn init(&mut self, config: &Config) -> Result<()> {
        self.root = config.csv.path.clone();
        Ok(())
    }

    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
        let metadata = message.metadata();
        let dir = self.root.join(&metadata.folder).join(&metadata.date);
        let path = dir.join(CSV_FILE_NAME);
        let record = record_for(message);

        // Blocking file I/O; keep it off the async worker threads
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create CSV directory: {}", dir.display()))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

            let mut writer = ::csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(file);
            writer
                .write_record(&record)
                .context("Failed to write CSV record")?;
            writer.flush().context("Failed to flush CSV file")?;
            Ok(())
        })
        .await
        .context("CSV writer task panicked")?
    }
}
