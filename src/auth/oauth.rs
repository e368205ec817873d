use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth is not configured")]
    NotConfigured,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("user fetch failed: {0}")]
    UserFetch(String),
}

/// Identity returned by the provider after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub cid: String,
    pub first_name: String,
    pub last_name: String,
}

impl Profile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// The authorization-code flow as seen by the callback handler.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Where to send the browser, carrying `state`.
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Trade the callback `code` for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, OAuthError>;
}

#[derive(Debug, Clone)]
pub struct VatsimOAuthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub user_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub timeout: Duration,
}

pub struct VatsimOAuth {
    config: VatsimOAuthConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    cid: serde_json::Value,
    personal: Personal,
}

#[derive(Deserialize)]
struct Personal {
    name_first: String,
    name_last: String,
}

impl VatsimOAuth {
    pub fn new(config: VatsimOAuthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn credentials(&self) -> Result<(&str, &str, &str), OAuthError> {
        match (
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
            self.config.redirect_uri.as_deref(),
        ) {
            (Some(id), Some(secret), Some(redirect)) => Ok((id, secret, redirect)),
            _ => Err(OAuthError::NotConfigured),
        }
    }
}

#[async_trait]
impl OAuthProvider for VatsimOAuth {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let (client_id, redirect_uri) = match (
            self.config.client_id.as_deref(),
            self.config.redirect_uri.as_deref(),
        ) {
            (Some(id), Some(redirect)) => (id, redirect),
            _ => return Err(OAuthError::NotConfigured),
        };
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", "full_name vatsim_details"),
                ("state", state),
            ],
        )
        .map_err(|_| OAuthError::NotConfigured)?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let (client_id, client_secret, redirect_uri) = self.credentials()?;
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("token exchange failed: {status} {body}");
            return Err(OAuthError::TokenExchange(status.to_string()));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, OAuthError> {
        let response = self
            .client
            .get(&self.config.user_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::UserFetch(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("user info fetch failed: {status} {body}");
            return Err(OAuthError::UserFetch(status.to_string()));
        }
        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::UserFetch(e.to_string()))?;
        // The provider sends the cid as a number; older payloads used a string.
        let cid = match user.data.cid {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s,
            other => return Err(OAuthError::UserFetch(format!("unexpected cid: {other}"))),
        };
        Ok(Profile {
            cid,
            first_name: user.data.personal.name_first,
            last_name: user.data.personal.name_last,
        })
    }
}
