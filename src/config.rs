use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Chats to track. Absent or empty means every chat is tracked.
    #[serde(default)]
    pub chats: Option<Vec<ChatConfig>>,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: PathBuf,
    #[serde(default = "default_static_path")]
    pub static_path: PathBuf,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default = "default_database_config")]
    pub database: DatabaseConfig,
    #[serde(default = "default_csv_config")]
    pub csv: CsvConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default = "default_google_cloud_config")]
    pub google_cloud: GoogleCloudConfig,
    #[serde(default = "default_ocr_config")]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChatConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CsvConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_csv_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleCloudConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// Parent Drive folder; empty means the Drive root.
    #[serde(default)]
    pub folder_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_languages")]
    pub languages: Vec<String>,
}

fn default_file_storage_path() -> PathBuf {
    PathBuf::from("file-storage")
}

fn default_static_path() -> PathBuf {
    PathBuf::from("static")
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("chatkeeper.db")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("csv")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}

fn default_ocr_languages() -> Vec<String> {
    ["ukr", "eng", "rus"].iter().map(|s| s.to_string()).collect()
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

fn default_database_config() -> DatabaseConfig {
    DatabaseConfig {
        path: default_db_path(),
    }
}

fn default_csv_config() -> CsvConfig {
    CsvConfig {
        enabled: false,
        path: default_csv_path(),
    }
}

fn default_google_cloud_config() -> GoogleCloudConfig {
    GoogleCloudConfig {
        enabled: false,
        credentials_file: default_credentials_file(),
        token_file: default_token_file(),
        folder_id: String::new(),
    }
}

fn default_ocr_config() -> OcrConfig {
    OcrConfig {
        enabled: false,
        command: default_ocr_command(),
        languages: default_ocr_languages(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chats: None,
            file_storage_path: default_file_storage_path(),
            static_path: default_static_path(),
            telegram: None,
            server: default_server_config(),
            database: default_database_config(),
            csv: default_csv_config(),
            webhook: WebhookConfig::default(),
            google_cloud: default_google_cloud_config(),
            ocr: default_ocr_config(),
        }
    }
}

impl Config {
    /// Configured chats, empty when tracking everything.
    pub fn chat_list(&self) -> &[ChatConfig] {
        self.chats.as_deref().unwrap_or_default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)?;

        if !config.file_storage_path.exists() {
            std::fs::create_dir_all(&config.file_storage_path).with_context(|| {
                format!(
                    "Failed to create file storage directory: {}",
                    config.file_storage_path.display()
                )
            })?;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.chats.is_none());
        assert_eq!(config.file_storage_path, PathBuf::from("file-storage"));
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(!config.csv.enabled);
        assert!(!config.webhook.enabled);
        assert!(!config.google_cloud.enabled);
        assert_eq!(config.ocr.languages, vec!["ukr", "eng", "rus"]);
    }

    #[test]
    fn test_chats_with_aliases() {
        let config = Config::parse(
            r#"
            [[chats]]
            id = "c1"
            alias = "Family"

            [[chats]]
            id = "c2"
            "#,
        )
        .unwrap();
        let chats = config.chat_list();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].alias.as_deref(), Some("Family"));
        assert_eq!(chats[1].alias, None);
    }

    #[test]
    fn test_sink_sections() {
        let config = Config::parse(
            r#"
            [csv]
            enabled = true
            path = "/tmp/csv"

            [webhook]
            enabled = true
            urls = ["http://a", "http://b"]

            [google_cloud]
            enabled = true
            folder_id = "abc"
            "#,
        )
        .unwrap();
        assert!(config.csv.enabled);
        assert_eq!(config.csv.path, PathBuf::from("/tmp/csv"));
        assert_eq!(config.webhook.urls.len(), 2);
        assert_eq!(config.google_cloud.folder_id, "abc");
        assert_eq!(config.google_cloud.token_file, PathBuf::from("token.json"));
    }

    #[test]
    fn test_load_creates_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("files");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!("file_storage_path = {:?}\n", storage.display().to_string()),
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.file_storage_path, storage);
        assert!(storage.is_dir());
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.chat_list()[0].alias.as_deref(), Some("Family"));
        assert!(config.telegram.is_some());
        assert_eq!(config.ocr.command, "tesseract");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }
}
