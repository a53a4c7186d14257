use std::path::PathBuf;

use tracing::info;

use crate::error::StageError;
use crate::message::AttachmentKind;

/// Voice notes are always written with this extension.
const AUDIO_EXTENSION: &str = "ogg";

/// Used when the MIME type has no registered extension.
const FALLBACK_EXTENSION: &str = "bin";

/// Writes attachment bytes under `root/folder/date/messageID.ext`.
#[derive(Debug, Clone)]
pub struct AttachmentStager {
    root: PathBuf,
}

impl AttachmentStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Destination path for an attachment, without touching the filesystem.
    pub fn destination(
        &self,
        folder: &str,
        date: &str,
        message_id: &str,
        kind: AttachmentKind,
        mime_type: &str,
    ) -> PathBuf {
        let ext = extension_for(kind, mime_type);
        self.root
            .join(folder)
            .join(date)
            .join(format!("{}.{}", message_id, ext))
    }

    pub async fn stage(
        &self,
        folder: &str,
        date: &str,
        message_id: &str,
        kind: AttachmentKind,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StageError> {
        let path = self.destination(folder, date, message_id, kind, mime_type);
        let dir = self.root.join(folder).join(date);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StageError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StageError::Write {
                path: path.clone(),
                source,
            })?;

        info!("Saved {:?} attachment to {}", kind, path.display());
        Ok(path)
    }
}

/// File extension (without the dot) for an attachment.
pub fn extension_for(kind: AttachmentKind, mime_type: &str) -> &'static str {
    if kind == AttachmentKind::Audio {
        return AUDIO_EXTENSION;
    }

    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    match mime_guess::get_mime_extensions_str(essence).and_then(|exts| exts.first()) {
        Some(&"jpe") | Some(&"jfif") | Some(&"jpeg") => "jpg",
        Some(ext) => *ext,
        None => FALLBACK_EXTENSION,
    }
}
