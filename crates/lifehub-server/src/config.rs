//! Server configuration.
//!
//! Settings live in `~/.config/lifehub/config.toml` by default. Every section
//! is optional. After the file is read, a handful of environment variables
//! override it (see [`ServerConfig::apply_env`]).
//!
//! Credential values (`client_id`, `client_secret`, `api_key`) support secret
//! references: `pass::path/in/store`, `env::VAR_NAME` or plain text.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lifehub_providers::GeminiConfig;
use lifehub_providers::google::{GoogleConfig, OAuthCredentials, RefreshPolicy};
use serde::{Deserialize, Serialize};

use crate::secret;

const REDACTED: &str = "<redacted>";

/// Configuration for the lifehub server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpSettings,
    pub google: GoogleSettings,
    pub drive: DriveSettings,
    pub database: DatabaseSettings,
    pub gemini: GeminiSettings,
    pub dedup: DedupSettings,
}

/// Listener and cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Address to listen on.
    pub bind: String,

    /// Externally visible base URL, used to build the OAuth redirect URI.
    pub public_url: String,

    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,

    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,

    /// How long a sign-in lasts, in seconds.
    pub session_max_age_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            public_url: "http://localhost:3000".to_string(),
            secure_cookies: false,
            max_body_bytes: 25 * 1024 * 1024,
            session_max_age_secs: 30 * 24 * 60 * 60,
        }
    }
}

impl HttpSettings {
    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }
}

/// When the Drive wrapper refreshes the access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    #[default]
    Always,
    WhenExpiring,
}

/// Google sign-in and API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` / `env::` references).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` / `env::` references).
    pub client_secret: Option<String>,

    /// Accounts allowed to sign in; empty allows everyone.
    pub allowed_emails: Vec<String>,

    /// Per-request timeout for Google calls, in seconds.
    pub timeout_secs: u64,

    pub refresh_policy: RefreshMode,

    /// Margin used by `when_expiring` and by the session refresh, in seconds.
    pub refresh_margin_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            allowed_emails: Vec::new(),
            timeout_secs: GoogleConfig::DEFAULT_TIMEOUT_SECS,
            refresh_policy: RefreshMode::Always,
            refresh_margin_secs: 5 * 60,
        }
    }
}

/// Drive photo folder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    /// Folder holding the photo library.
    pub folder_id: Option<String>,

    /// Share uploads with anyone holding the link.
    pub public_read: bool,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            folder_id: None,
            public_read: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: format!(
                "sqlite://{}",
                ServerConfig::default_data_dir().join("lifehub.db").display()
            ),
            max_connections: 5,
        }
    }
}

/// Image labelling settings. Labelling is off without an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: GeminiConfig::DEFAULT_MODEL.to_string(),
            base_url: GeminiConfig::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Upload de-duplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// How long a finished upload is remembered, in seconds.
    pub ttl_secs: u64,
    /// How often expired entries are swept, in seconds.
    pub eviction_interval_secs: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 10 * 60,
            eviction_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Loads the default config file, falling back to defaults when absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lifehub")
    }

    /// Directory holding the default SQLite database.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lifehub")
    }

    /// Overlays settings from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlays settings from `lookup`.
    ///
    /// Recognised variables: `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`,
    /// `ALLOWED_EMAILS` (comma separated), `DRIVE_FOLDER_ID`, `DATABASE_URL`,
    /// `GEMINI_API_KEY` and `LIFEHUB_BIND`. Empty values are ignored.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(v);
        }
        if let Some(v) = get("ALLOWED_EMAILS") {
            self.google.allowed_emails = v
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(v) = get("DRIVE_FOLDER_ID") {
            self.drive.folder_id = Some(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(v);
        }
        if let Some(v) = get("LIFEHUB_BIND") {
            self.server.bind = v;
        }
        self
    }

    /// The Drive folder id, if one is configured.
    pub fn folder_id(&self) -> Option<&str> {
        self.drive
            .folder_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Builds the provider configuration for the Google clients.
    pub fn google_config(&self) -> Result<GoogleConfig, String> {
        let credentials = self.google.resolve_credentials()?;
        credentials.validate().map_err(|e| e.to_string())?;

        let config = GoogleConfig::new(credentials)
            .with_timeout(Duration::from_secs(self.google.timeout_secs))
            .with_refresh_policy(self.google.policy())
            .with_public_read(self.drive.public_read);
        config.validate()?;
        Ok(config)
    }

    /// Builds the Gemini configuration, or `None` when labelling is off.
    pub fn gemini_config(&self) -> Result<Option<GeminiConfig>, String> {
        let Some(raw) = self.gemini.api_key.as_deref() else {
            return Ok(None);
        };
        let api_key =
            secret::resolve(raw).map_err(|e| format!("failed to resolve gemini api_key: {}", e))?;
        Ok(Some(
            GeminiConfig::new(api_key)
                .with_model(&self.gemini.model)
                .with_base_url(&self.gemini.base_url)
                .with_timeout(Duration::from_secs(self.gemini.timeout_secs)),
        ))
    }

    /// A copy safe to print: plain-text secrets are masked, secret
    /// references are kept as written.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.google.client_secret = config.google.client_secret.map(redact);
        config.gemini.api_key = config.gemini.api_key.map(redact);
        config
    }

    /// Checks the settings needed to serve requests.
    pub fn validate(&self) -> Result<(), String> {
        self.google_config()?;
        self.gemini_config()?;
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("invalid bind address: {}", self.server.bind));
        }
        if self.dedup.ttl_secs == 0 {
            return Err("dedup ttl_secs must be greater than zero".to_string());
        }
        if self.server.session_max_age_secs == 0 {
            return Err("server session_max_age_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn redact(value: String) -> String {
    if matches!(secret::SecretRef::parse(&value), secret::SecretRef::Plain(_)) {
        REDACTED.to_string()
    } else {
        value
    }
}

impl GoogleSettings {
    /// Resolves the OAuth credentials, expanding secret references.
    pub fn resolve_credentials(&self) -> Result<OAuthCredentials, String> {
        let raw_id = self.client_id.as_deref().ok_or_else(|| {
            format!(
                "Google credentials not found. Add to {} or set GOOGLE_CLIENT_ID:\n  \
                 [google]\n  \
                 client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                 client_secret = \"YOUR_SECRET\"",
                ServerConfig::default_path().display()
            )
        })?;
        let raw_secret = self.client_secret.as_deref().ok_or_else(|| {
            "client_secret is missing from [google] (or set GOOGLE_CLIENT_SECRET)".to_string()
        })?;

        let client_id = secret::resolve(raw_id)
            .map_err(|e| format!("failed to resolve client_id: {}", e))?;
        let client_secret = secret::resolve(raw_secret)
            .map_err(|e| format!("failed to resolve client_secret: {}", e))?;

        Ok(OAuthCredentials::new(client_id, client_secret))
    }

    /// The refresh policy for the Drive wrapper.
    pub fn policy(&self) -> RefreshPolicy {
        match self.refresh_policy {
            RefreshMode::Always => RefreshPolicy::Always,
            RefreshMode::WhenExpiring => RefreshPolicy::WhenExpiring {
                margin: self.refresh_margin(),
            },
        }
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}
