//! Bearer-token providers for outbound FHIR requests.
//!
//! The client treats authentication as an opaque request decorator: a
//! [`TokenProvider`] yields the current bearer token, and a failure to obtain
//! one fails the request it was needed for.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Refresh this long before token expiry to avoid using a token that dies
/// mid-request.
const REFRESH_BUFFER: Duration = Duration::from_secs(30);

/// Assumed token lifetime when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current bearer token.
    async fn token(&self) -> Result<String>;
}

/// Fixed token, for tests and pre-provisioned credentials.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// OAuth2 client-credentials configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuth2Config {
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuth2Config {
    /// True when all required fields are set.
    pub fn is_configured(&self) -> bool {
        !self.token_url.is_empty() && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Token provider using the OAuth2 client-credentials grant.
///
/// Tokens are cached and refreshed shortly before expiry; concurrent callers
/// serialize on the cache so only one refresh is in flight at a time.
pub struct OAuth2ClientCredentials {
    config: OAuth2Config,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuth2ClientCredentials {
    pub fn new(config: OAuth2Config, http: reqwest::Client) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Token(
                "OAuth2 configuration is incomplete: token_url, client_id and client_secret are required"
                    .to_string(),
            ));
        }
        Ok(Self {
            config,
            http,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        let scope = self.config.scopes.join(" ");
        if !scope.is_empty() {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Token(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Token(format!("failed to read token response: {e}")))?;
        if !status.is_success() {
            return Err(Error::Token(format!(
                "token request returned status {status}: {body}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Token(format!("failed to parse token response: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(Error::Token(
                "token response did not contain access_token".to_string(),
            ));
        }

        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::debug!(token_url = %self.config.token_url, "obtained OAuth2 access token");

        Ok(CachedToken {
            value: parsed.access_token,
            expires_at: Utc::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuth2ClientCredentials {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - REFRESH_BUFFER > Utc::now() {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}
