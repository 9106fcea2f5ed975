//! Google OAuth 2.0 access token management.
//!
//! Credentials are acquired elsewhere; this module only turns a refresh token
//! (or a pre-issued access token) into a bearer token and caches it until it
//! is about to expire.

use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Lifetime assumed for a pre-issued access token.
const PREISSUED_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Google OAuth credentials and token cache.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    inner: Arc<RwLock<GoogleAuthInner>>,
}

#[derive(Debug)]
struct GoogleAuthInner {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_url: String,
    access_token: Option<String>,
    token_expires_at: Option<Instant>,
}

/// Configuration for Google OAuth.
#[derive(Debug, Clone, Default)]
pub struct GoogleAuthConfig {
    /// OAuth client ID
    pub client_id: Option<String>,
    /// OAuth client secret
    pub client_secret: Option<String>,
    /// Refresh token issued during the (external) consent flow
    pub refresh_token: Option<String>,
    /// Pre-issued access token, used as-is until it expires
    pub access_token: Option<String>,
    /// Token endpoint override (tests point this at a mock server)
    pub token_url: Option<String>,
}

impl GoogleAuthConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            client_id: env_non_empty("GOOGLE_CLIENT_ID"),
            client_secret: env_non_empty("GOOGLE_CLIENT_SECRET"),
            refresh_token: env_non_empty("GOOGLE_REFRESH_TOKEN"),
            access_token: env_non_empty("GOOGLE_ACCESS_TOKEN"),
            token_url: env_non_empty("GOOGLE_TOKEN_URL"),
        }
    }

    /// Check if the configuration carries usable credentials.
    pub fn is_valid(&self) -> bool {
        self.access_token.is_some() || self.can_refresh()
    }

    fn can_refresh(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }
}

/// Error types for Google authentication.
#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("http error: {0}")]
    HttpError(String),
    #[error("json error: {0}")]
    JsonError(String),
}

impl GoogleAuth {
    /// Create a new GoogleAuth instance from configuration.
    pub fn new(config: GoogleAuthConfig) -> Result<Self, GoogleAuthError> {
        if !config.is_valid() {
            return Err(GoogleAuthError::MissingCredentials(
                "Either GOOGLE_ACCESS_TOKEN or (GOOGLE_CLIENT_ID + GOOGLE_CLIENT_SECRET + GOOGLE_REFRESH_TOKEN) must be set".to_string(),
            ));
        }

        let token_expires_at = config
            .access_token
            .as_ref()
            .map(|_| Instant::now() + PREISSUED_TOKEN_TTL);

        Ok(Self {
            inner: Arc::new(RwLock::new(GoogleAuthInner {
                client_id: config.client_id,
                client_secret: config.client_secret,
                refresh_token: config.refresh_token,
                token_url: config
                    .token_url
                    .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
                access_token: config.access_token,
                token_expires_at,
            })),
        })
    }

    /// Create a new GoogleAuth instance from environment variables.
    pub fn from_env() -> Result<Self, GoogleAuthError> {
        Self::new(GoogleAuthConfig::from_env())
    }

    /// Get a valid access token, refreshing if necessary.
    pub fn get_access_token(&self) -> Result<String, GoogleAuthError> {
        {
            let inner = self.inner.read().unwrap_or_else(|poison| poison.into_inner());
            if let (Some(token), Some(expires_at)) = (&inner.access_token, &inner.token_expires_at)
            {
                if *expires_at > Instant::now() + EXPIRY_BUFFER {
                    return Ok(token.clone());
                }
            }
        }

        self.refresh_access_token()
    }

    /// Force refresh the access token.
    pub fn refresh_access_token(&self) -> Result<String, GoogleAuthError> {
        let (client_id, client_secret, refresh_token, token_url) = {
            let inner = self.inner.read().unwrap_or_else(|poison| poison.into_inner());
            match (&inner.client_id, &inner.client_secret, &inner.refresh_token) {
                (Some(client_id), Some(client_secret), Some(refresh_token)) => (
                    client_id.clone(),
                    client_secret.clone(),
                    refresh_token.clone(),
                    inner.token_url.clone(),
                ),
                _ => {
                    return Err(GoogleAuthError::MissingCredentials(
                        "access token expired and no refresh credentials are configured"
                            .to_string(),
                    ))
                }
            }
        };

        self.refresh_via_oauth(&token_url, &client_id, &client_secret, &refresh_token)
    }

    fn refresh_via_oauth(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<String, GoogleAuthError> {
        debug!("Refreshing Google OAuth token");

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .map_err(|e| GoogleAuthError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("OAuth token refresh failed: {} - {}", status, body);
            return Err(GoogleAuthError::TokenRefreshFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .map_err(|e| GoogleAuthError::JsonError(e.to_string()))?;

        let expires_at =
            Instant::now() + Duration::from_secs(token_response.expires_in.max(0) as u64);
        let access_token = token_response.access_token.clone();

        {
            let mut inner = self.inner.write().unwrap_or_else(|poison| poison.into_inner());
            inner.access_token = Some(token_response.access_token);
            inner.token_expires_at = Some(expires_at);
        }

        debug!("Google OAuth token refreshed successfully");
        Ok(access_token)
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refresh_config(token_url: String) -> GoogleAuthConfig {
        GoogleAuthConfig {
            client_id: Some("client_id".to_string()),
            client_secret: Some("client_secret".to_string()),
            refresh_token: Some("refresh_token".to_string()),
            access_token: None,
            token_url: Some(token_url),
        }
    }

    #[test]
    fn test_config_validation() {
        let empty_config = GoogleAuthConfig::default();
        assert!(!empty_config.is_valid());
        assert!(GoogleAuth::new(empty_config).is_err());

        let oauth_config = refresh_config("http://localhost".to_string());
        assert!(oauth_config.is_valid());

        let token_config = GoogleAuthConfig {
            access_token: Some("ya29.token".to_string()),
            ..Default::default()
        };
        assert!(token_config.is_valid());
    }

    #[test]
    fn preissued_token_is_used_without_network() {
        let auth = GoogleAuth::new(GoogleAuthConfig {
            access_token: Some("ya29.preissued".to_string()),
            ..Default::default()
        })
        .expect("auth");
        assert_eq!(auth.get_access_token().expect("token"), "ya29.preissued");
    }

    #[test]
    fn refresh_token_flow_caches_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::Regex("grant_type=refresh_token".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create();

        let auth = GoogleAuth::new(refresh_config(format!("{}/token", server.url()))).expect("auth");
        assert_eq!(auth.get_access_token().expect("first"), "ya29.fresh");
        assert_eq!(auth.get_access_token().expect("cached"), "ya29.fresh");
        mock.assert();
    }

    #[test]
    fn refresh_failure_surfaces_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create();

        let auth = GoogleAuth::new(refresh_config(format!("{}/token", server.url()))).expect("auth");
        let err = auth.get_access_token().expect_err("should fail");
        assert!(matches!(err, GoogleAuthError::TokenRefreshFailed(_)));
    }
}
