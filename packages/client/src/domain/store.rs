//! Persistence and token exchange boundaries.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::{Map, Value};

use crate::error::ClientError;

pub type SettingsMap = Map<String, Value>;

/// Access token persistence
#[cfg_attr(test, automock)]
pub trait TokenStore: Send + Sync {
    fn load_token(&self) -> Option<String>;

    fn save_token(&self, access_token: &str) -> Result<(), ClientError>;

    /// Succeeds when no token was saved.
    fn delete_token(&self) -> Result<(), ClientError>;
}

/// Key/value settings persistence
#[cfg_attr(test, automock)]
pub trait SettingsStore: Send + Sync {
    /// Empty map when absent or unreadable.
    fn load_settings(&self) -> SettingsMap;

    /// Merge `partial` into the saved settings.
    fn save_settings(&self, partial: SettingsMap) -> Result<(), ClientError>;
}

/// OAuth2 authorization code -> access token (PKCE, no client secret)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ClientError>;
}
