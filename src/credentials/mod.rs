pub mod client;
pub mod google;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AuthError;

pub use client::AuthorizedClient;

/// Tokens closer than this to expiry are refreshed before use.
pub fn refresh_margin() -> Duration {
    Duration::hours(1)
}

/// OAuth access token with its absolute expiry instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    ExpiringSoon,
    Expired,
}

impl Credential {
    pub fn state_at(&self, now: DateTime<Utc>) -> CredentialState {
        if self.expiry <= now {
            CredentialState::Expired
        } else if self.expiry <= now + refresh_margin() {
            CredentialState::ExpiringSoon
        } else {
            CredentialState::Valid
        }
    }
}

/// Source of fresh credentials
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Exchange the stored refresh credential for a new access token
    async fn refresh(&self, current: &Credential) -> Result<Credential>;

    /// Out-of-band flow where the operator authorizes access by hand
    async fn authorize_interactive(&self) -> Result<Credential>;
}

/// JSON token file on stable storage
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` when no token has been saved yet
    pub async fn load(&self) -> Result<Option<Credential>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read token file: {}", self.path.display()))
            }
        };
        let credential = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;
        Ok(Some(credential))
    }

    /// Truncate and rewrite the token file
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let content = serde_json::to_vec_pretty(credential)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open token file: {}", self.path.display()))?;
        file.write_all(&content).await?;
        file.sync_all().await?;

        info!("Saved credential file to {}", self.path.display());
        Ok(())
    }
}

/// Owns the OAuth token for outbound cloud calls.
///
/// All token state changes happen while holding `current`, so concurrent
/// callers that find an expired token wait for a single refresh and then
/// reuse its result. A new token is written to the token file before it
/// is handed out.
pub struct CredentialManager {
    provider: Arc<dyn TokenProvider>,
    store: TokenFile,
    current: Mutex<Option<Credential>>,
}

impl CredentialManager {
    pub fn new(provider: Arc<dyn TokenProvider>, store: TokenFile) -> Self {
        Self {
            provider,
            store,
            current: Mutex::new(None),
        }
    }

    /// Access token for the next outbound call, refreshing it first when
    /// it is within the refresh margin of expiry.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            *current = self.load_cached().await;
        }

        let fresh = match current.as_ref() {
            Some(credential) => match credential.state_at(Utc::now()) {
                CredentialState::Valid => return Ok(credential.access_token.clone()),
                state => {
                    info!("Credential is {:?}, refreshing", state);
                    self.renew(credential).await?
                }
            },
            None => {
                info!("No cached credential, starting interactive authorization");
                self.provider
                    .authorize_interactive()
                    .await
                    .map_err(|e| AuthError::Interactive(format!("{:#}", e)))?
            }
        };

        self.install(&mut current, fresh).await
    }

    /// Reactive path after the server rejected `rejected`. If another call
    /// already replaced that token, the replacement is returned as-is.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<String, AuthError> {
        let mut current = self.current.lock().await;

        let stale = match current.as_ref() {
            Some(credential) if credential.access_token != rejected => {
                return Ok(credential.access_token.clone());
            }
            Some(credential) => credential.clone(),
            None => return Err(AuthError::NoCredential),
        };

        info!("Server rejected the access token, refreshing");
        let fresh = self
            .provider
            .refresh(&stale)
            .await
            .map_err(|e| AuthError::Refresh(format!("{:#}", e)))?;

        self.install(&mut current, fresh).await
    }

    async fn load_cached(&self) -> Option<Credential> {
        match self.store.load().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Ignoring unreadable token file: {:#}", e);
                None
            }
        }
    }

    /// Refresh, falling back to the interactive flow if that fails
    async fn renew(&self, credential: &Credential) -> Result<Credential, AuthError> {
        match self.provider.refresh(credential).await {
            Ok(fresh) => Ok(fresh),
            Err(refresh_err) => {
                warn!(
                    "Unable to refresh token: {:#}; falling back to interactive authorization",
                    refresh_err
                );
                self.provider.authorize_interactive().await.map_err(|e| {
                    AuthError::Interactive(format!(
                        "refresh failed ({:#}), then interactive authorization failed ({:#})",
                        refresh_err, e
                    ))
                })
            }
        }
    }

    /// Persist a new credential, then make it current
    async fn install(
        &self,
        current: &mut Option<Credential>,
        fresh: Credential,
    ) -> Result<String, AuthError> {
        self.store
            .save(&fresh)
            .await
            .map_err(|e| AuthError::Persist(format!("{:#}", e)))?;
        let token = fresh.access_token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}
