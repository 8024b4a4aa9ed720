//! Authorize using the client credentials flow.

use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tokio::time::{Duration, Instant};

use crate::viya::utils::{check_status, ServerError};

/// Token endpoint path, relative to the platform base URL.
pub const TOKEN_PATH: &str = "/SASLogon/oauth/token";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("malformed token response: {0}")]
    Malformed(#[from] MalformedResponse),
    #[error("encoding token request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

impl Error {
    /// HTTP status returned by the token endpoint, if it got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server(ServerError { status_code, .. }) => Some(*status_code),
            Self::Reqwest(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedResponse {
    #[error("{0}")]
    Json(#[source] serde_json::Error),
    #[error("access_token is empty")]
    EmptyToken,
    #[error("expires_in is zero")]
    ZeroLifetime,
    #[error("expires_in of {0}s is out of range")]
    LifetimeOverflow(u64),
}

#[derive(Clone)]
pub struct ClientCredentials {
    pub client: reqwest::Client,
    pub client_id: String,
    pub client_secret: String,
    /// Platform base URL without a trailing slash, e.g. `https://viya.example.com`.
    pub base_url: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ClientCredentials {
    pub fn token_url(&self) -> String {
        format!("{}{}", self.base_url, TOKEN_PATH)
    }

    /// Perform the client credentials flow.
    ///
    /// One round-trip, no retries. The request timeout configured on
    /// `client` surfaces as [`Error::Reqwest`].
    pub async fn perform(&self) -> Result<AuthResponse, Error> {
        let params = &[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let params = serde_urlencoded::to_string(params)?;

        let req = self
            .client
            .post(self.token_url())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(params)
            .build()?;

        let res = self.client.execute(req).await?;
        let res = check_status(res).await?;
        let body = res.bytes().await?;
        let login_response = AuthResponse::parse(&body)?;
        Ok(login_response)
    }
}

#[derive(Deserialize)]
pub struct AuthResponse {
    /// The requested access token.
    access_token: String,
    /// The amount of time that an access token is valid (in seconds).
    expires_in: u64,
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl AuthResponse {
    pub fn parse(body: &[u8]) -> Result<Self, MalformedResponse> {
        let response: Self = serde_json::from_slice(body).map_err(MalformedResponse::Json)?;
        if response.access_token.is_empty() {
            return Err(MalformedResponse::EmptyToken);
        }
        if response.expires_in == 0 {
            return Err(MalformedResponse::ZeroLifetime);
        }
        Ok(response)
    }

    pub fn expires_in(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

#[derive(Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: Instant,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TryFrom<AuthResponse> for Token {
    type Error = MalformedResponse;

    fn try_from(auth: AuthResponse) -> Result<Self, Self::Error> {
        let AuthResponse {
            access_token,
            expires_in,
        } = auth;
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(expires_in))
            .ok_or(MalformedResponse::LifetimeOverflow(expires_in))?;
        Ok(Self {
            access_token,
            expires_at,
        })
    }
}

#[async_trait::async_trait]
impl super::TokenProvider for ClientCredentials {
    type Token = Token;
    type Error = Error;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        let auth_response = self.perform().await?;
        let token = Token::try_from(auth_response)?;
        Ok(token)
    }
}

impl super::Token for Token {
    fn access_token(&self) -> &str {
        self.access_token.as_str()
    }
}

impl super::ExpiringToken for Token {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}
