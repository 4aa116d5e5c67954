//! Client configuration
//!
//! Every field has a default, so a TOML file only needs to name what differs:
//!
//! ```rust
//! use pushcall_client_core::ClientConfig;
//!
//! let config = ClientConfig::from_toml_str(r#"
//!     token_url = "https://voice.example.com/accessToken"
//!     device_push_token = "fcm-device-token"
//! "#).unwrap();
//!
//! assert_eq!(config.token_url, "https://voice.example.com/accessToken");
//! assert_eq!(config.event_channel_capacity, 64);
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Default notification channel for incoming-call alerts
pub const DEFAULT_ALERT_CHANNEL: &str = "incoming-call";

/// Configuration for the call client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Token endpoint, queried as `GET <token_url>?identity=<id>`
    pub token_url: String,
    /// JSON document holding the saved identity
    pub identity_store_path: PathBuf,
    /// Device push token handed to the SDK at registration
    pub device_push_token: Option<String>,
    /// Buffer of the broadcast event channel
    pub event_channel_capacity: usize,
    /// User agent sent to the token endpoint
    pub user_agent: String,
    /// Notification channel used for incoming-call alerts
    pub alert_channel: String,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            token_url: "http://127.0.0.1:8000/accessToken".to_string(),
            identity_store_path: default_identity_store_path(),
            device_push_token: None,
            event_channel_capacity: 64,
            user_agent: format!("pushcall/{}", env!("CARGO_PKG_VERSION")),
            alert_channel: DEFAULT_ALERT_CHANNEL.to_string(),
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> ClientResult<Self> {
        toml::from_str(raw).map_err(|e| ClientError::config(format!("invalid config: {}", e)))
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_identity_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_store_path = path.into();
        self
    }

    pub fn with_device_push_token(mut self, token: impl Into<String>) -> Self {
        self.device_push_token = Some(token.into());
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_alert_channel(mut self, channel: impl Into<String>) -> Self {
        self.alert_channel = channel.into();
        self
    }

    /// Check the values that cannot be caught by deserialization
    pub fn validate(&self) -> ClientResult<()> {
        let url = url::Url::parse(&self.token_url)
            .map_err(|e| ClientError::config(format!("token_url '{}': {}", self.token_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::config("token_url must use http or https"));
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::config("event_channel_capacity must be greater than 0"));
        }
        if self.alert_channel.trim().is_empty() {
            return Err(ClientError::config("alert_channel must not be empty"));
        }
        if self.identity_store_path.as_os_str().is_empty() {
            return Err(ClientError::config("identity_store_path must not be empty"));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_identity_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pushcall")
        .join("identity.json")
}
