use crate::app::config::Config;
use crate::error::{GatewayError, Result};
use crate::models::api::{
    AdditionalInfo, Amount, CreateQrRequest, CreateQrResponse, StatusRequest, StatusResponse,
    CURRENCY_IDR, QR_CREATE_PATH, QR_STATUS_PATH,
};
use crate::models::payment::{Credential, PaymentRecord, PaymentStatus, RemoteStatusSnapshot};
use crate::services::auth_client::{wire_timestamp, AuthClient};
use crate::services::poller::StatusSource;
use crate::services::signature::SignatureCodec;
use crate::services::store::PaymentStore;
use crate::services::token_cache::TokenCache;
use crate::utils::money::{format_amount, validate_amount};
use crate::utils::qr::qr_image_url;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Signed client for the bank's QRIS endpoints.
///
/// Holds no token state of its own; tokens come from the injected
/// [`TokenCache`], which may be shared with other clients.
pub struct GatewayClient {
    client: Client,
    config: Arc<Config>,
    credential: Credential,
    tokens: Arc<TokenCache>,
    store: Arc<dyn PaymentStore>,
}

impl GatewayClient {
    pub fn new(
        client: Client,
        config: Arc<Config>,
        tokens: Arc<TokenCache>,
        store: Arc<dyn PaymentStore>,
    ) -> Self {
        let credential = config.credential();
        Self {
            client,
            config,
            credential,
            tokens,
            store,
        }
    }

    /// Builds the HTTP client, the token endpoint client and a fresh cache.
    pub fn from_config(config: Arc<Config>, store: Arc<dyn PaymentStore>) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("cannot build HTTP client: {}", e)))?;

        let auth = Arc::new(AuthClient::new(client.clone(), config.clone()));
        let tokens = Arc::new(TokenCache::new(auth, config.token_margin()));

        Ok(Self::new(client, config, tokens, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    /// Creates a dynamic QR and records it as `PENDING`.
    ///
    /// Input validation and the duplicate-reference check run before any
    /// network traffic. Never retried: QR creation is not idempotent remotely.
    pub async fn create_payment(
        &self,
        amount: Decimal,
        reference: &str,
        callback_url: Option<&str>,
    ) -> Result<PaymentRecord> {
        let amount = validate_amount(amount)?;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(GatewayError::InvalidInput("reference is required".into()));
        }
        if let Some(callback_url) = callback_url {
            url::Url::parse(callback_url).map_err(|e| {
                GatewayError::InvalidInput(format!("invalid callback URL {}: {}", callback_url, e))
            })?;
        }

        if self.store.exists(reference).await? {
            warn!("Rejecting duplicate reference {}", reference);
            return Err(GatewayError::DuplicateReference(reference.to_string()));
        }

        let now = Utc::now();
        let expires_at = now + self.config.qr_expiry();
        let merchant = &self.config.merchant;

        let request = CreateQrRequest {
            partner_reference_no: reference.to_string(),
            amount: Amount {
                value: format_amount(amount),
                currency: CURRENCY_IDR.to_string(),
            },
            merchant_id: merchant.nmid.clone(),
            store_label: merchant.name.clone(),
            terminal_label: merchant.city.clone(),
            validity_period: expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            additional_info: callback_url.map(|url| AdditionalInfo {
                callback_url: url.to_string(),
            }),
        };

        let response: CreateQrResponse = self
            .signed_post(QR_CREATE_PATH, reference, &request)
            .await?;

        let qr_content = response
            .qr_content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                error!("QR creation for {} returned no qrContent", reference);
                GatewayError::MalformedResponse("missing qrContent".into())
            })?;
        let qr_id = response
            .qr_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| reference.to_string());

        let record = PaymentRecord {
            qr_image_url: qr_image_url(&qr_content),
            qr_id,
            reference: reference.to_string(),
            qr_string: qr_content,
            amount,
            status: PaymentStatus::Pending,
            transaction_id: None,
            paid_at: None,
            expires_at,
            created_at: now,
            updated_at: None,
        };

        self.store.insert(record.clone()).await?;
        info!(
            "Created QR {} for {} ({} {})",
            record.qr_id,
            record.reference,
            format_amount(record.amount),
            CURRENCY_IDR
        );

        Ok(record)
    }

    /// Asks the bank for the current status of a QR. Read-only.
    pub async fn check_status(&self, qr_id: &str, reference: &str) -> Result<RemoteStatusSnapshot> {
        if qr_id.trim().is_empty() {
            return Err(GatewayError::InvalidInput("qr id is required".into()));
        }

        let request = StatusRequest::new(reference, qr_id);
        let response: StatusResponse = self.signed_post(QR_STATUS_PATH, qr_id, &request).await?;
        let snapshot = response.into_snapshot(qr_id)?;

        debug!(
            "Status for {}: code {} -> {}",
            qr_id, snapshot.code, snapshot.status
        );
        Ok(snapshot)
    }

    async fn signed_post<B, R>(&self, path: &str, external_id: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let token = self.tokens.get_token(&self.credential).await?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| GatewayError::InvalidInput(format!("cannot encode request: {}", e)))?;

        let timestamp = wire_timestamp();
        let signature = SignatureCodec::service_signature(
            "POST",
            path,
            &token.value,
            &payload,
            &timestamp,
            &self.credential.client_secret,
        );

        let url = format!("{}{}", self.config.base_url(), path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", token.value))
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .header("X-PARTNER-ID", &self.config.merchant.nmid)
            .header("X-EXTERNAL-ID", external_id)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                // Token revogado do lado do banco
                self.tokens.clear(&self.credential);
            }
            error!("POST {} failed with HTTP {}", path, status);
            return Err(GatewayError::Remote {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl StatusSource for GatewayClient {
    async fn check_status(&self, qr_id: &str, reference: &str) -> Result<RemoteStatusSnapshot> {
        GatewayClient::check_status(self, qr_id, reference).await
    }
}
