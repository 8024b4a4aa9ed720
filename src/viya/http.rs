//! Shared HTTP client construction.

use std::path::{Path, PathBuf};

use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("reading certificate bundle {}: {source}", path.display())]
    ReadBundle {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("certificate bundle {} contains no certificates", path.display())]
    EmptyBundle { path: PathBuf },
    #[error("parsing certificate bundle {}: {source}", path.display())]
    ParseBundle {
        path: PathBuf,
        source: reqwest::Error,
    },
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Build the client every call to the platform goes through.
///
/// With a `ca_bundle` the server certificate is validated against the
/// certificates in that PEM file in addition to the default trust store.
pub fn build_client(
    ca_bundle: Option<&Path>,
    timeout: Duration,
) -> Result<reqwest::Client, ClientBuildError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

    if let Some(path) = ca_bundle {
        for certificate in load_bundle(path)? {
            builder = builder.add_root_certificate(certificate);
        }
    }

    let client = builder.build()?;
    Ok(client)
}

fn load_bundle(path: &Path) -> Result<Vec<reqwest::Certificate>, ClientBuildError> {
    let pem = std::fs::read(path).map_err(|source| ClientBuildError::ReadBundle {
        path: path.to_owned(),
        source,
    })?;
    parse_bundle(path, &pem)
}

fn parse_bundle(path: &Path, pem: &[u8]) -> Result<Vec<reqwest::Certificate>, ClientBuildError> {
    let certificates = reqwest::Certificate::from_pem_bundle(pem).map_err(|source| {
        ClientBuildError::ParseBundle {
            path: path.to_owned(),
            source,
        }
    })?;
    if certificates.is_empty() {
        return Err(ClientBuildError::EmptyBundle {
            path: path.to_owned(),
        });
    }
    Ok(certificates)
}
