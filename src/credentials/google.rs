use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::info;

use super::{Credential, TokenProvider};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Contents of the OAuth client secret file downloaded from the cloud console
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn parse(content: &str) -> Result<Self> {
        let file: ClientSecretFile =
            serde_json::from_str(content).context("Failed to parse client secret file")?;
        file.installed
            .or(file.web)
            .context("Client secret file has neither an 'installed' nor a 'web' section")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read client secret file: {}", path.display()))?;
        Self::parse(&content)
    }
}

/// Google OAuth 2.0 token endpoint client
pub struct GoogleOAuth {
    secret: ClientSecret,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(secret: ClientSecret) -> Self {
        Self {
            secret,
            scopes: vec![DRIVE_SCOPE.to_string(), SHEETS_SCOPE.to_string()],
            http: reqwest::Client::new(),
        }
    }

    fn redirect_uri(&self) -> &str {
        self.secret
            .redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// URL the operator opens to grant access
    pub fn authorization_url(&self) -> Result<reqwest::Url> {
        let scope = self.scopes.join(" ");
        reqwest::Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("state", "state-token"),
            ],
        )
        .context("Invalid auth_uri in client secret file")
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        previous_refresh: Option<&str>,
    ) -> Result<Credential> {
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(params)
            .send()
            .await
            .context("Token endpoint unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Token request failed ({}): {}", status, error_text);
        }

        let token_data: serde_json::Value = response.json().await?;
        if token_data.get("error").is_some() {
            let error_desc = token_data
                .get("error_description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            anyhow::bail!("Token request failed: {}", error_desc);
        }

        let access_token = token_data["access_token"]
            .as_str()
            .context("Missing access_token")?
            .to_string();
        // Google omits refresh_token on refresh responses; keep the old one
        let refresh_token = token_data
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| previous_refresh.map(str::to_string));
        let expires_in = token_data
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(3600);

        Ok(Credential {
            access_token,
            refresh_token,
            expiry: Utc::now() + Duration::seconds(expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for GoogleOAuth {
    async fn refresh(&self, current: &Credential) -> Result<Credential> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .context("No refresh token available")?;

        self.request_token(
            &[
                ("refresh_token", refresh_token),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ],
            Some(refresh_token),
        )
        .await
    }

    async fn authorize_interactive(&self) -> Result<Credential> {
        let url = self.authorization_url()?;
        println!("\nOpen this URL in your browser to authorize Google Drive access:\n");
        println!("  {}\n", url);
        println!("Then paste the authorization code here:");

        let code = tokio::task::spawn_blocking(|| -> Result<String> {
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("Failed to read authorization code")?;
            Ok(line.trim().to_string())
        })
        .await
        .context("Authorization prompt task failed")??;

        if code.is_empty() {
            anyhow::bail!("No authorization code entered");
        }

        info!("Exchanging authorization code for a token");
        self.request_token(
            &[
                ("code", code.as_str()),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("grant_type", "authorization_code"),
            ],
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn secret_for(token_uri: String) -> ClientSecret {
        ClientSecret {
            client_id: "client-1".to_string(),
            client_secret: "shh".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri,
            redirect_uris: vec![],
        }
    }

    fn stale() -> Credential {
        Credential {
            access_token: "old".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expiry: Utc::now(),
        }
    }

    #[test]
    fn test_parse_installed_and_web_sections() {
        let installed = r#"{"installed": {"client_id": "a", "client_secret": "b",
            "auth_uri": "https://auth", "token_uri": "https://token",
            "redirect_uris": ["http://localhost"]}}"#;
        let secret = ClientSecret::parse(installed).unwrap();
        assert_eq!(secret.client_id, "a");
        assert_eq!(secret.redirect_uris, vec!["http://localhost"]);

        let web = r#"{"web": {"client_id": "w", "client_secret": "b",
            "auth_uri": "https://auth", "token_uri": "https://token"}}"#;
        assert_eq!(ClientSecret::parse(web).unwrap().client_id, "w");

        assert!(ClientSecret::parse(r#"{"other": {}}"#).is_err());
    }

    #[test]
    fn test_authorization_url_requests_offline_access() {
        let oauth = GoogleOAuth::new(secret_for("https://token".to_string()));
        let url = oauth.authorization_url().unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(query.contains(&("client_id".to_string(), "client-1".to_string())));
        let scope = &query.iter().find(|(k, _)| k == "scope").unwrap().1;
        assert!(scope.contains(DRIVE_SCOPE));
        assert!(scope.contains(SHEETS_SCOPE));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = GoogleOAuth::new(secret_for(format!("{}/token", server.uri())));
        let fresh = oauth.refresh(&stale()).await.unwrap();
        assert_eq!(fresh.access_token, "new");
        assert_eq!(fresh.refresh_token.as_deref(), Some("rt-1"));
        assert!(fresh.expiry > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let oauth = GoogleOAuth::new(secret_for(format!("{}/token", server.uri())));
        let err = oauth.refresh(&stale()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("expired or revoked"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails_early() {
        let oauth = GoogleOAuth::new(secret_for("http://127.0.0.1:9/token".to_string()));
        let mut credential = stale();
        credential.refresh_token = None;
        assert!(oauth.refresh(&credential).await.is_err());
    }
}
