use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use super::Sink;
use crate::config::{Config, OcrConfig};
use crate::message::TrackableMessage;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "jpe", "webp"];

/// Text extraction engine used by the OCR sink
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Confirm the engine can run at all
    async fn check(&self) -> Result<()>;

    async fn extract_text(&self, image: &Path) -> Result<String>;
}

/// Runs the `tesseract` command line tool
pub struct TesseractCli {
    command: String,
    languages: String,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            languages: config.languages.join("+"),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn check(&self) -> Result<()> {
        let output = tokio::process::Command::new(&self.command)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to run OCR engine: {}", self.command))?;
        if !output.status.success() {
            anyhow::bail!(
                "OCR engine '{}' exited with {}",
                self.command,
                output.status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }

    async fn extract_text(&self, image: &Path) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg(image).arg("stdout");
        if !self.languages.is_empty() {
            cmd.arg("-l").arg(&self.languages);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run OCR on {}", image.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("OCR failed for {}: {}", image.display(), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Appends text recognised in image attachments to `parsed_content`
pub struct OcrSink {
    engine: Option<Box<dyn OcrEngine>>,
}

impl OcrSink {
    pub fn new() -> Self {
        Self { engine: None }
    }

    #[cfg(test)]
    pub fn with_engine(engine: Box<dyn OcrEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }
}

#[async_trait]
impl Sink for OcrSink {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn init(&mut self, config: &Config) -> Result<()> {
        let engine = self
            .engine
            .get_or_insert_with(|| Box::new(TesseractCli::new(&config.ocr)) as Box<dyn OcrEngine>);
        engine.check().await
    }

    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
        let engine = self.engine.as_ref().context("OCR engine not initialized")?;

        let images: Vec<_> = message
            .files()
            .iter()
            .filter(|f| is_image(f))
            .cloned()
            .collect();
        for image in images {
            info!("Processing image {}", image.display());
            let text = engine.extract_text(&image).await?;
            info!("Extracted {} chars from {}", text.len(), image.display());
            message.append_parsed_content(&text);
        }
        Ok(())
    }
}
