//! Viya platform access: token acquisition and the services that consume it.

use tracing::debug;

use crate::config::Config;

use self::auth::{client_credentials::ClientCredentials, token_manager::TokenManager};

pub mod auth;
pub mod http;
pub mod mas;
mod utils;

pub use self::utils::ServerError;

/// Token provider used by the platform clients.
pub type Tokens = TokenManager<ClientCredentials>;

/// Wire up the HTTP client, the client credentials flow and the token cache
/// from the startup configuration.
pub fn token_manager(client: reqwest::Client, config: &Config) -> Tokens {
    let credentials = ClientCredentials {
        client,
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        base_url: config.base_url.clone(),
    };
    debug!(message = "Configured client credentials", credentials = ?credentials);

    let tokens = TokenManager::new(credentials)
        .with_safety_margin(config.safety_margin)
        .with_failure_policy(config.failure_policy);
    debug!(
        message = "Configured token manager",
        base_url = %config.base_url,
        safety_margin = ?tokens.safety_margin(),
        failure_policy = ?tokens.failure_policy(),
    );
    tokens
}

/// Build everything needed to talk to the platform from the startup configuration.
pub fn connect(config: &Config) -> Result<mas::MicroanalyticScore<Tokens>, http::ClientBuildError> {
    let client = http::build_client(config.ca_bundle.as_deref(), config.request_timeout)?;
    let tokens = token_manager(client.clone(), config);
    Ok(mas::MicroanalyticScore {
        client,
        base_url: config.base_url.clone(),
        auth_token_provider: tokens,
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::Duration;

    use super::*;
    use crate::viya::auth::token_manager::RefreshFailurePolicy;

    #[test]
    fn token_manager_takes_settings_from_config() {
        let config = Config::from_lookup(|key: &str| match key {
            "VIYA_CLIENT_ID" => Some("abc".into()),
            "VIYA_CLIENT_SECRET" => Some("xyz".into()),
            "VIYA_BASE_URL" => Some("https://example.test".into()),
            "VIYA_TOKEN_MARGIN_SECS" => Some("90".into()),
            "VIYA_TOKEN_FALLBACK" => Some("serve-unexpired".into()),
            _ => None,
        })
        .unwrap();

        let tokens = token_manager(reqwest::Client::new(), &config);
        assert_eq!(tokens.safety_margin(), Duration::from_secs(90));
        assert_eq!(tokens.failure_policy(), RefreshFailurePolicy::ServeUnexpired);
    }
}
