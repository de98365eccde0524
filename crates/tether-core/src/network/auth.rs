//! Credential provider hooks.
//!
//! Token acquisition lives outside this crate; the orchestrator only asks
//! for the current token before each attempt and for a refreshed one after
//! a 401.

use crate::error::{Result, TetherError};
use async_trait::async_trait;
use std::sync::RwLock;

/// Supplies bearer tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` for anonymous requests.
    async fn get_token(&self) -> Result<Option<String>>;

    /// Obtain a fresh token after the server rejected the current one.
    async fn refresh_token(&self) -> Result<String>;
}

/// Anonymous access. Refreshing always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn get_token(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn refresh_token(&self) -> Result<String> {
        Err(TetherError::Auth("no credentials configured".to_string()))
    }
}

/// A fixed token, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_token(&self) -> Result<Option<String>> {
        Ok(self.token.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn refresh_token(&self) -> Result<String> {
        Err(TetherError::Auth(
            "static token was rejected and cannot be refreshed".to_string(),
        ))
    }
}
