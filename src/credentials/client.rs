use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::warn;

use super::CredentialManager;

const EXPIRED_TOKEN_MARKER: &str = "expired or revoked";

/// HTTP client that attaches a bearer token to every request and retries
/// once with a refreshed token when the server rejects it.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    credentials: Arc<CredentialManager>,
}

fn mentions_expired_token(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().to_lowercase().contains(EXPIRED_TOKEN_MARKER) {
            return true;
        }
        current = e.source();
    }
    false
}

impl AuthorizedClient {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    /// `build` is called again for the retry, so it must produce the same request.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let token = self.credentials.access_token().await?;
        let first = build(&self.http).bearer_auth(&token).send().await;

        let rejected = match &first {
            Ok(response) => response.status() == StatusCode::UNAUTHORIZED,
            Err(e) => mentions_expired_token(e),
        };
        if !rejected {
            return first.context("Request failed");
        }

        warn!("Access token rejected, refreshing and retrying once");
        let token = self.credentials.refresh_after_rejection(&token).await?;
        let response = build(&self.http)
            .bearer_auth(&token)
            .send()
            .await
            .context("Request failed after token refresh")?;
        if response.status() == StatusCode::UNAUTHORIZED {
            anyhow::bail!("Request still unauthorized after token refresh");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::testing::{credential_expiring_in, CountingProvider};
    use crate::credentials::TokenFile;
    use chrono::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_with_token(
        token: &str,
    ) -> (AuthorizedClient, Arc<CountingProvider>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.json"));
        file.save(&credential_expiring_in(token, Duration::hours(3)))
            .await
            .unwrap();
        let provider = Arc::new(CountingProvider::new());
        let manager = Arc::new(CredentialManager::new(provider.clone(), file));
        (AuthorizedClient::new(manager), provider, dir)
    }

    #[test]
    fn test_expired_marker_is_found_in_error_text() {
        let err = std::io::Error::new(
            std::io::ErrorKind::Other,
            "oauth2: Token has been expired or revoked.",
        );
        assert!(mentions_expired_token(&err));
        let other = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        assert!(!mentions_expired_token(&other));
    }

    #[tokio::test]
    async fn test_unauthorized_response_is_retried_with_fresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("Authorization", "Bearer refreshed-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let (client, provider, _dir) = client_with_token("stale").await;
        let url = format!("{}/files", server.uri());
        let response = client.send(|http| http.get(&url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(provider.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_second_rejection_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let (client, provider, _dir) = client_with_token("stale").await;
        let url = format!("{}/files", server.uri());
        assert!(client.send(|http| http.get(&url)).await.is_err());
        assert_eq!(provider.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_accepted_token_is_not_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (client, provider, _dir) = client_with_token("good").await;
        let url = format!("{}/files", server.uri());
        client.send(|http| http.get(&url)).await.unwrap();
        assert_eq!(provider.refresh_count(), 0);
    }
}
