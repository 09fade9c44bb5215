use std::path::PathBuf;
use thiserror::Error;

/// Errors raised below the fetcher boundary and by the token providers.
///
/// None of these escape [`crate::fetcher::UsageFetcher`]: each one is
/// classified into a [`crate::fetcher::FetchOutcome`] first.
#[derive(Error, Debug)]
pub enum UsageError {
    // Transport errors
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to parse usage payload")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Invalid header value for '{name}'")]
    InvalidHeader { name: String },

    // Credential errors
    #[error("Failed to read credentials file: {path}")]
    CredentialsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse credentials: {context}")]
    CredentialsParse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No OAuth credentials found")]
    MissingToken,

    #[error("Environment variable '{var}' not set")]
    EnvVarMissing { var: String },
}

impl UsageError {
    /// True when there is simply no credential to use, as opposed to one that
    /// exists but could not be read or parsed right now.
    pub fn is_missing_credential(&self) -> bool {
        match self {
            UsageError::MissingToken | UsageError::EnvVarMissing { .. } => true,
            UsageError::CredentialsRead { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UsageError>;
