//! Access credential retrieval
//!
//! The backend exposes a single endpoint: `GET <token_url>?identity=<id>`,
//! answering with `{"token": "<signed credential>"}`. Anything other than a
//! 2xx response carrying a non-empty token is treated as a network failure.
//! There are no retries here; the user re-initiates.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::identity::Identity;

/// Query parameter carrying the identity
pub const IDENTITY_QUERY_PARAM: &str = "identity";

/// Short-lived signed token scoped to one identity
///
/// Never persisted. The `Debug` output keeps the token out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    identity: Identity,
    token: String,
    fetched_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new(identity: Identity, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: token.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Identity the credential was issued for
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Raw signed token, as handed to the voice SDK
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

/// Source of access credentials
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh credential for `identity`
    async fn fetch(&self, identity: &Identity) -> ClientResult<AccessCredential>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Token client for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenClient {
    /// Create a client for `endpoint`, e.g. `https://example.com/accessToken`
    pub fn new(endpoint: &str, user_agent: &str) -> ClientResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ClientError::config(format!("invalid token url '{}': {}", endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClientError::config(format!(
                "token url must be http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url_for(&self, identity: &Identity) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(IDENTITY_QUERY_PARAM, identity.as_str());
        url
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    async fn fetch(&self, identity: &Identity) -> ClientResult<AccessCredential> {
        let url = self.url_for(identity);
        debug!(%identity, endpoint = %self.endpoint, "Fetching access token");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::network(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%identity, %status, "Token endpoint rejected request");
            return Err(ClientError::network(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::network(format!("malformed token response: {}", e)))?;

        if body.token.trim().is_empty() {
            return Err(ClientError::network("token endpoint returned an empty token"));
        }

        debug!(%identity, "Access token received");
        Ok(AccessCredential::new(identity.clone(), body.token))
    }
}

/// Issues the same token for every identity
///
/// Useful against the loopback SDK, which does not verify tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch(&self, identity: &Identity) -> ClientResult<AccessCredential> {
        Ok(AccessCredential::new(identity.clone(), self.token.clone()))
    }
}
