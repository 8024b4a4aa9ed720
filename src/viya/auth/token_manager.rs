use std::{fmt, str::FromStr};

use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use super::TokenProvider;

/// How long before its literal expiry a token is already treated as stale.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Caches the token of an inner provider and refreshes it when it gets
/// close to expiry.
///
/// The cache lock is held for the whole check, refresh and store sequence,
/// so concurrent callers never trigger more than one refresh and always see
/// a token/expiry pair from the same response.
pub struct TokenManager<Provider>
where
    Provider: TokenProvider,
{
    provider: Provider,
    cached_token: Mutex<Option<Record>>,
    safety_margin: Duration,
    failure_policy: RefreshFailurePolicy,
}

/// What `get_token` does when a refresh fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshFailurePolicy {
    /// Every failed refresh is returned to the caller.
    #[default]
    FailFast,
    /// A cached token inside its safety margin, but not past its real
    /// expiry, is returned instead of the refresh error.
    ServeUnexpired,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown refresh failure policy {0:?}, expected \"fail-fast\" or \"serve-unexpired\"")]
pub struct UnknownPolicy(pub String);

impl FromStr for RefreshFailurePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(Self::FailFast),
            "serve-unexpired" => Ok(Self::ServeUnexpired),
            other => Err(UnknownPolicy(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthenticationError<RenewalError> {
    #[error("token refresh: {0}")]
    Refresh(#[source] RenewalError),
    #[error("token provider returned a token that is already expired")]
    Expired,
}

#[derive(Clone)]
pub struct Record {
    pub access_token: String,
    pub obtained_at: Instant,
    pub expires_at: Instant,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Record {
    pub fn from_expiring_token<T: super::ExpiringToken>(token: T, obtained_at: Instant) -> Self {
        Self {
            access_token: token.access_token().to_owned(),
            obtained_at,
            expires_at: token.expires_at(),
        }
    }

    /// Past its literal expiry.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Expired, or will be within `margin`.
    pub fn needs_refresh(&self, now: Instant, margin: Duration) -> bool {
        now.checked_add(margin)
            .map_or(true, |deadline| deadline >= self.expires_at)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

impl super::Token for Record {
    fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl super::ExpiringToken for Record {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

impl<Provider> TokenManager<Provider>
where
    Provider: TokenProvider,
    <Provider as TokenProvider>::Token: super::ExpiringToken,
    <Provider as TokenProvider>::Error: fmt::Display,
{
    pub fn new(provider: Provider) -> Self {
        let cached_token = Mutex::const_new(None);
        Self {
            provider,
            cached_token,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            failure_policy: RefreshFailurePolicy::default(),
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: RefreshFailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    pub fn failure_policy(&self) -> RefreshFailurePolicy {
        self.failure_policy
    }

    /// Snapshot of the cached record, without refreshing.
    pub async fn cached(&self) -> Option<Record> {
        self.cached_token.lock().await.clone()
    }

    async fn fetch_new_token(&self) -> Result<Record, AuthenticationError<Provider::Error>> {
        let obtained_at = Instant::now();
        let token = self
            .provider
            .get_auth_token()
            .await
            .map_err(AuthenticationError::Refresh)?;
        let record = Record::from_expiring_token(token, obtained_at);
        if record.is_expired(Instant::now()) {
            return Err(AuthenticationError::Expired);
        }
        Ok(record)
    }

    pub async fn get_token(&self) -> Result<Record, AuthenticationError<Provider::Error>> {
        let mut cached_token = self.cached_token.lock().await;

        if let Some(ref cached) = *cached_token {
            if !cached.needs_refresh(Instant::now(), self.safety_margin) {
                debug!(message = "Using preexisting token", token_expires_in = ?cached.remaining());
                return Ok(cached.clone());
            }
            debug!(message = "Existing token is about to expire, refreshing", token_expires_in = ?cached.remaining());
        }

        info!(
            message = "No active token found, about to get a new one",
            token_is_stale = cached_token.is_some(),
        );

        let err = match self.fetch_new_token().await {
            Ok(new_record) => {
                info!(message = "Got new token", token_expires_in = ?new_record.remaining());
                cached_token.replace(new_record.clone());
                return Ok(new_record);
            }
            Err(err) => err,
        };

        warn!(
            message = "Token refresh failed",
            error = %err,
            failure_policy = ?self.failure_policy,
        );

        if self.failure_policy == RefreshFailurePolicy::ServeUnexpired {
            if let Some(ref cached) = *cached_token {
                if !cached.is_expired(Instant::now()) {
                    warn!(message = "Serving cached token inside its safety margin", token_expires_in = ?cached.remaining());
                    return Ok(cached.clone());
                }
            }
        }

        Err(err)
    }
}

#[async_trait::async_trait]
impl<Provider> super::TokenProvider for TokenManager<Provider>
where
    Provider: TokenProvider,
    <Provider as TokenProvider>::Token: super::ExpiringToken,
    <Provider as TokenProvider>::Error: fmt::Display,
{
    type Token = Record;
    type Error = AuthenticationError<Provider::Error>;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        let token = self.get_token().await?;
        Ok(token)
    }
}
