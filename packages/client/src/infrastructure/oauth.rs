//! OAuth2 PKCE helpers and the HTTPS token exchange.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{domain::TokenExchanger, error::ClientError};

pub const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);
const CLIENT_USER_AGENT: &str = concat!("voicelink/", env!("CARGO_PKG_VERSION"));

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// 32 random bytes, base64url encoded (43 characters).
    pub fn generate() -> Self {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

/// Public-client token exchange; no client secret is sent.
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

#[async_trait]
impl TokenExchanger for OAuthClient {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ClientError> {
        tracing::info!("Exchanging authorization code for token (PKCE)");
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .timeout(EXCHANGE_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::OAuth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Token endpoint returned HTTP {}: {}", status.as_u16(), body);
            return Err(ClientError::OAuth(format!("HTTP {} error", status.as_u16())));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::OAuth(format!("unreadable token response: {e}")))?;

        match body.access_token.filter(|token| !token.is_empty()) {
            Some(token) => {
                tracing::info!("Access token obtained via PKCE");
                Ok(token)
            }
            None => {
                let reason = body
                    .error_description
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::error!("Token response without access_token: {}", reason);
                Err(ClientError::OAuth(format!("API error: {reason}")))
            }
        }
    }
}
