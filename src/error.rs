use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to stage an attachment on disk. Aborts the message it belongs to.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to create attachment directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write attachment {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Credential acquisition failure. Fatal only to the call that needed a token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential available")]
    NoCredential,
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("interactive authorization failed: {0}")]
    Interactive(String),
    #[error("failed to persist token: {0}")]
    Persist(String),
}

#[derive(Debug)]
pub struct DeliveryFailure {
    pub url: String,
    pub cause: String,
}

/// Every webhook URL that did not accept a message, with its cause.
#[derive(Debug)]
pub struct DeliveryError {
    pub failures: Vec<DeliveryFailure>,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "webhook delivery failed for {} url(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.url, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for DeliveryError {}
