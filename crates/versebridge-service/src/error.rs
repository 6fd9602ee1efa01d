//! Error types for the integration layer.

use thiserror::Error;

/// Errors surfaced by the third-party integrations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential issuance at a third-party token endpoint failed.
    #[error("auth failure at {source_name}: {message}")]
    Auth {
        source_name: &'static str,
        message: String,
    },

    /// A response could not be parsed into the expected shape.
    #[error("parse error from {source_name}: {message}")]
    Parse {
        source_name: &'static str,
        message: String,
    },

    /// The app private key could not sign an assertion. Configuration
    /// error, not transient.
    #[error("assertion signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// An error propagated from `reqwest`.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// An error propagated from the core domain layer.
    #[error("core error: {0}")]
    Core(#[from] versebridge_core::Error),

    /// The deploy pull could not complete.
    #[error("deploy failed: {0}")]
    Deploy(String),
}

impl ApiError {
    /// Returns `true` when the error is a credential-issuance failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Convenience alias for integration results.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
