use crate::app::config::Config;
use crate::error::{GatewayError, Result};
use crate::models::api::{TokenRequest, TokenResponse, AUTH_TOKEN_PATH};
use crate::models::payment::{AccessToken, Credential};
use crate::services::signature::SignatureCodec;
use crate::services::token_cache::TokenSource;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use std::sync::Arc;
use tracing::{error, info};

/// Wire timestamp: UTC, millisecond precision.
pub fn wire_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Calls the B2B token endpoint. Used as the [`TokenSource`] behind the cache.
pub struct AuthClient {
    client: Client,
    config: Arc<Config>,
}

impl AuthClient {
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TokenSource for AuthClient {
    async fn fetch_token(&self, credential: &Credential) -> Result<AccessToken> {
        let url = format!("{}{}", self.config.base_url(), AUTH_TOKEN_PATH);

        // Gerado imediatamente antes da chamada
        let timestamp = wire_timestamp();
        let signature = SignatureCodec::token_signature(
            &credential.client_id,
            &timestamp,
            &credential.client_secret,
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-TIMESTAMP", &timestamp)
            .header("X-CLIENT-KEY", &credential.client_id)
            .header("X-SIGNATURE", signature)
            .json(&TokenRequest::default())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Token request rejected with HTTP {}", status);
            return Err(GatewayError::AuthFailure {
                status: status.as_u16(),
                body,
            });
        }

        let (value, ttl) = serde_json::from_str::<TokenResponse>(&body)?.into_parts()?;
        info!("Obtained access token valid for {}s", ttl);

        let expires_at = Duration::try_seconds(ttl)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                GatewayError::MalformedResponse(format!("expiresIn {} out of range", ttl))
            })?;

        Ok(AccessToken::new(value, expires_at))
    }
}
