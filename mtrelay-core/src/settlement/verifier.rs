//! External transaction verification.

use crate::config::SettlementConfig;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// What the verifier learned about a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Confirmed,
    /// Not visible yet. Retried until the attempt budget runs out.
    NotFound,
    /// Definitively rejected.
    Failed,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Worth retrying on a later poll.
    #[error("transient verification error: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for VerifyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

#[async_trait::async_trait]
pub trait TransactionVerifier: Send + Sync {
    async fn verify(&self, tx_hash: &str) -> Result<Verification, VerifyError>;
}

/// Looks transactions up on a block explorer at `{explorer_base}/{tx_hash}`.
pub struct ExplorerVerifier {
    client: reqwest::Client,
    base: Url,
}

impl ExplorerVerifier {
    pub fn new(config: &SettlementConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base: config.explorer_base.clone(),
        }
    }

    fn lookup_url(&self, tx_hash: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), tx_hash)
    }
}

/// Map an explorer response status to a verification outcome.
pub fn classify_status(status: StatusCode) -> Result<Verification, VerifyError> {
    if status.is_success() {
        Ok(Verification::Confirmed)
    } else if status == StatusCode::NOT_FOUND {
        Ok(Verification::NotFound)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(VerifyError::Transient(format!("explorer returned {status}")))
    } else if status.is_client_error() {
        Ok(Verification::Failed)
    } else {
        Err(VerifyError::Transient(format!("unexpected explorer status {status}")))
    }
}

#[async_trait::async_trait]
impl TransactionVerifier for ExplorerVerifier {
    async fn verify(&self, tx_hash: &str) -> Result<Verification, VerifyError> {
        let url = self.lookup_url(tx_hash);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        debug!(tx_hash, %status, "Explorer lookup");
        classify_status(status)
    }
}
