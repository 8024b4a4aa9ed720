//! Authorization logic.
//!
//! [`client_credentials::ClientCredentials`] talks to the token endpoint,
//! [`token_manager::TokenManager`] caches what it returns and decides when
//! to ask again. Both implement [`TokenProvider`], so anything that needs a
//! bearer token can take either one (or a fake in tests).

use tokio::time::Instant;

pub mod client_credentials;
pub mod token_manager;

#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    type Token: Token;
    type Error: Send + Sync;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error>;
}

pub trait Token: Send {
    fn access_token(&self) -> &str;
}

pub trait ExpiringToken: Token {
    fn expires_at(&self) -> Instant;
}

#[async_trait::async_trait]
impl<P> TokenProvider for std::sync::Arc<P>
where
    P: TokenProvider,
{
    type Token = P::Token;
    type Error = P::Error;

    async fn get_auth_token(&self) -> Result<Self::Token, Self::Error> {
        (**self).get_auth_token().await
    }
}
