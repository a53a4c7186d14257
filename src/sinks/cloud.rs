use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Sink;
use crate::config::Config;
use crate::credentials::google::{ClientSecret, GoogleOAuth};
use crate::credentials::{AuthorizedClient, CredentialManager, TokenFile};
use crate::message::TrackableMessage;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const SHARED_LINK_PREFIX: &str = "https://drive.google.com/uc?id=";

/// Base URLs of the Drive and Sheets REST APIs
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub drive: String,
    pub upload: String,
    pub sheets: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            drive: "https://www.googleapis.com/drive/v3".to_string(),
            upload: "https://www.googleapis.com/upload/drive/v3".to_string(),
            sheets: "https://sheets.googleapis.com/v4".to_string(),
        }
    }
}

/// Uploads attachments to Drive and appends one spreadsheet row per message.
///
/// Layout on Drive: `{folder_id or root}/{folder}/{date}/` holds the shared
/// attachments and a spreadsheet named after the chat.
pub struct CloudSink {
    endpoints: GoogleEndpoints,
    folder_id: String,
    client: Option<AuthorizedClient>,
}

impl CloudSink {
    pub fn new() -> Self {
        Self {
            endpoints: GoogleEndpoints::default(),
            folder_id: String::new(),
            client: None,
        }
    }

    #[cfg(test)]
    fn with_client(client: AuthorizedClient, endpoints: GoogleEndpoints, folder_id: &str) -> Self {
        Self {
            endpoints,
            folder_id: folder_id.to_string(),
            client: Some(client),
        }
    }

    fn client(&self) -> Result<&AuthorizedClient> {
        self.client.as_ref().context("Cloud sink not initialized")
    }

    async fn call<F>(&self, what: &str, build: F) -> Result<Value>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.client()?.send(build).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed ({}): {}", what, status, body);
        }
        let text = response.text().await?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("{}: invalid JSON response", what))
    }

    async fn find_child(
        &self,
        name: &str,
        parent: &str,
        mime: Option<&str>,
    ) -> Result<Option<String>> {
        let mut query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(parent)
        );
        if let Some(mime) = mime {
            query.push_str(&format!(" and mimeType='{}'", mime));
        }
        let url = format!("{}/files", self.endpoints.drive);

        let found = self
            .call("Drive search", |http| {
                http.get(&url)
                    .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            })
            .await?;
        Ok(found["files"]
            .as_array()
            .and_then(|files| files.first())
            .and_then(|file| file["id"].as_str())
            .map(str::to_string))
    }

    async fn create_file(&self, metadata: Value) -> Result<String> {
        let url = format!("{}/files", self.endpoints.drive);
        let created = self
            .call("Drive create", |http| http.post(&url).json(&metadata))
            .await?;
        created["id"]
            .as_str()
            .map(str::to_string)
            .context("Drive create response has no id")
    }

    /// Walk `{folder}/{date}` below the configured parent, creating missing folders
    async fn ensure_folder(&self, segments: &[&str]) -> Result<String> {
        let mut parent = if self.folder_id.is_empty() {
            "root".to_string()
        } else {
            self.folder_id.clone()
        };

        for segment in segments {
            parent = match self.find_child(segment, &parent, Some(FOLDER_MIME)).await? {
                Some(id) => id,
                None => {
                    info!("Creating Drive folder '{}'", segment);
                    self.create_file(json!({
                        "name": segment,
                        "mimeType": FOLDER_MIME,
                        "parents": [parent],
                    }))
                    .await?
                }
            };
        }
        Ok(parent)
    }

    /// Upload one attachment and share it publicly, returning its link
    async fn store_file(&self, local: &Path, folder_id: &str) -> Result<String> {
        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read attachment: {}", local.display()))?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_id = self
            .create_file(json!({ "name": name, "parents": [folder_id] }))
            .await?;

        let upload_url = format!("{}/files/{}", self.endpoints.upload, file_id);
        self.call("Drive upload", |http| {
            http.patch(&upload_url)
                .query(&[("uploadType", "media")])
                .header("Content-Type", "application/octet-stream")
                .body(bytes.clone())
        })
        .await?;

        let permissions_url = format!("{}/files/{}/permissions", self.endpoints.drive, file_id);
        self.call("Drive share", |http| {
            http.post(&permissions_url)
                .json(&json!({ "type": "anyone", "role": "reader" }))
        })
        .await?;

        debug!("Uploaded {} as {}", local.display(), file_id);
        Ok(format!("{}{}", SHARED_LINK_PREFIX, file_id))
    }

    async fn spreadsheet_for(&self, chat: &str, folder_id: &str) -> Result<String> {
        if let Some(id) = self.find_child(chat, folder_id, Some(SPREADSHEET_MIME)).await? {
            return Ok(id);
        }

        info!("Creating spreadsheet for chat {}", chat);
        let url = format!("{}/spreadsheets", self.endpoints.sheets);
        let created = self
            .call("Sheets create", |http| {
                http.post(&url)
                    .json(&json!({ "properties": { "title": chat } }))
            })
            .await?;
        let spreadsheet_id = created["spreadsheetId"]
            .as_str()
            .context("Sheets create response has no spreadsheetId")?
            .to_string();

        let move_url = format!("{}/files/{}", self.endpoints.drive, spreadsheet_id);
        self.call("Drive move", |http| {
            http.patch(&move_url)
                .query(&[("addParents", folder_id), ("removeParents", "root")])
                .json(&json!({}))
        })
        .await?;

        Ok(spreadsheet_id)
    }

    async fn append_row(&self, spreadsheet_id: &str, row: Vec<String>) -> Result<()> {
        let url = format!(
            "{}/spreadsheets/{}/values/A1:append",
            self.endpoints.sheets, spreadsheet_id
        );
        let body = json!({ "values": [row] });
        self.call("Sheets append", |http| {
            http.post(&url)
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&body)
        })
        .await?;
        info!("Inserted row into spreadsheet {}", spreadsheet_id);
        Ok(())
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn row_for(message: &TrackableMessage, links: &[String]) -> Vec<String> {
    let mut row = vec![
        message.id().to_string(),
        message.metadata().timestamp.format("%H:%M:%S").to_string(),
        message.sender().to_string(),
        message.content().to_string(),
        message.parsed_content().to_string(),
    ];
    for link in links {
        row.push(format!("=IMAGE(\"{}\")", link));
        row.push(link.clone());
    }
    row
}

#[async_trait]
impl Sink for CloudSink {
    fn name(&self) -> &'static str {
        "google_cloud"
    }

    async fn init(&mut self, config: &Config) -> Result<()> {
        let cloud = &config.google_cloud;
        let secret = ClientSecret::load(&cloud.credentials_file).await?;
        let manager = Arc::new(CredentialManager::new(
            Arc::new(GoogleOAuth::new(secret)),
            TokenFile::new(&cloud.token_file),
        ));
        manager
            .access_token()
            .await
            .context("Unable to obtain Google credentials")?;

        self.folder_id = cloud.folder_id.clone();
        self.client = Some(AuthorizedClient::new(manager));
        Ok(())
    }

    async fn track_message(&self, message: &mut TrackableMessage) -> Result<()> {
        let metadata = message.metadata();
        let folder_id = self
            .ensure_folder(&[metadata.folder.as_str(), metadata.date.as_str()])
            .await?;

        let mut links = Vec::with_capacity(message.files().len());
        for file in message.files() {
            links.push(self.store_file(file, &folder_id).await?);
        }

        let spreadsheet_id = self.spreadsheet_for(message.chat(), &folder_id).await?;
        self.append_row(&spreadsheet_id, row_for(message, &links))
            .await
    }
}
