//! Shared-secret authentication for the tool server.
//!
//! Every exchange carries the secret in the `X-API-KEY` header. Comparison happens on SHA-256
//! digests with [`subtle::ConstantTimeEq`], so the check takes the same time however much of the
//! secret matches.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authentication policy for incoming exchanges.
#[derive(Clone)]
pub enum AuthConfig {
    /// No authentication required
    None,
    /// Exact match against a shared secret
    SharedSecret(String),
}

impl AuthConfig {
    pub fn shared_secret(secret: impl Into<String>) -> Self {
        Self::SharedSecret(secret.into())
    }

    /// Validate the value of the `X-API-KEY` header (`None` when absent).
    pub fn validate(&self, provided: Option<&str>) -> bool {
        match self {
            AuthConfig::None => true,
            AuthConfig::SharedSecret(secret) => match provided {
                Some(provided) => {
                    let expected_hash = Sha256::digest(secret.as_bytes());
                    let provided_hash = Sha256::digest(provided.as_bytes());
                    expected_hash.ct_eq(&provided_hash).into()
                }
                None => false,
            },
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, AuthConfig::SharedSecret(_))
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::None => f.write_str("AuthConfig::None"),
            AuthConfig::SharedSecret(_) => f.write_str("AuthConfig::SharedSecret(***)"),
        }
    }
}
