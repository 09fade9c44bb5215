//! Bearer token sources
//!
//! Token retrieval and refresh belong to the surrounding system; this module
//! only offers the providers the CLI needs:
//! - a fixed token handed in by the caller
//! - an environment variable
//! - the Claude Code credentials file (`~/.claude/.credentials.json`)

use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Result, UsageError};

/// Environment variable checked before the credentials file
pub const TOKEN_ENV_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// Supplies the bearer token for the usage API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A token known up front.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<String> {
        match env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(UsageError::EnvVarMissing {
                var: self.var.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaudeCredentials {
    claude_ai_oauth: Option<OAuthCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthCredentials {
    access_token: String,
}

/// Reads `claudeAiOauth.accessToken` from a Claude Code credentials file.
#[derive(Debug, Clone)]
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for CredentialsFile {
    fn default() -> Self {
        Self::new(default_credentials_path())
    }
}

#[async_trait]
impl TokenProvider for CredentialsFile {
    async fn token(&self) -> Result<String> {
        let content = fs::read_to_string(&self.path).await.map_err(|source| {
            UsageError::CredentialsRead {
                path: self.path.clone(),
                source,
            }
        })?;

        parse_credentials_json(&content)
    }
}

/// Tries each provider in order and returns the first token found.
pub struct ChainedTokens {
    providers: Vec<Box<dyn TokenProvider>>,
}

impl ChainedTokens {
    pub fn new(providers: Vec<Box<dyn TokenProvider>>) -> Self {
        Self { providers }
    }

    /// Environment variable first, then the credentials file at `path`.
    pub fn env_then_file(path: impl Into<PathBuf>) -> Self {
        Self::new(vec![
            Box::new(EnvToken::default()),
            Box::new(CredentialsFile::new(path)),
        ])
    }
}

#[async_trait]
impl TokenProvider for ChainedTokens {
    async fn token(&self) -> Result<String> {
        let mut last_err = UsageError::MissingToken;
        for provider in &self.providers {
            match provider.token().await {
                Ok(token) => return Ok(token),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

/// Location Claude Code writes its OAuth credentials to
pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join(".credentials.json")
}

fn parse_credentials_json(json_str: &str) -> Result<String> {
    let creds: ClaudeCredentials =
        serde_json::from_str(json_str.trim()).map_err(|source| UsageError::CredentialsParse {
            context: "credentials JSON".to_string(),
            source,
        })?;

    creds
        .claude_ai_oauth
        .map(|oauth| oauth.access_token)
        .filter(|token| !token.is_empty())
        .ok_or(UsageError::MissingToken)
}
