//! Wire schemas for the bank's QRIS endpoints and the inbound webhook.
//!
//! Responses decode into `Option` fields and are then checked explicitly, so a
//! missing mandatory field surfaces as [`GatewayError::MalformedResponse`]
//! naming the field instead of a generic decode error.

use crate::error::{GatewayError, Result};
use crate::models::payment::RemoteStatusSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const AUTH_TOKEN_PATH: &str = "/openapi/auth/v2.0/access-token/b2b";
pub const QR_CREATE_PATH: &str = "/openapi/qris/v2.0/qr-code";
pub const QR_STATUS_PATH: &str = "/openapi/qris/v2.0/qr-code/status";

pub const GRANT_TYPE: &str = "client_credentials";
pub const CURRENCY_IDR: &str = "IDR";
pub const STATUS_SERVICE_CODE: &str = "47";
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
pub const MAX_TOKEN_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub grant_type: String,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            grant_type: GRANT_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<NumberOrString>,
}

impl TokenResponse {
    /// Returns the token value and its lifetime in seconds.
    pub fn into_parts(self) -> Result<(String, i64)> {
        let token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse("missing accessToken".into()))?;

        let ttl = match self.expires_in {
            Some(value) => value.as_i64().ok_or_else(|| {
                GatewayError::MalformedResponse("expiresIn is not an integer".into())
            })?,
            None => DEFAULT_TOKEN_TTL_SECS,
        };
        if !(1..=MAX_TOKEN_TTL_SECS).contains(&ttl) {
            return Err(GatewayError::MalformedResponse(format!(
                "expiresIn {} outside 1..={}",
                ttl, MAX_TOKEN_TTL_SECS
            )));
        }

        Ok((token, ttl))
    }
}

/// Some gateway builds send numbers as JSON strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

impl NumberOrString {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NumberOrString::Number(n) => n.as_i64(),
            NumberOrString::String(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            NumberOrString::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            NumberOrString::String(s) => Decimal::from_str(s.trim()).ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Amount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalInfo {
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQrRequest {
    pub partner_reference_no: String,
    pub amount: Amount,
    pub merchant_id: String,
    pub store_label: String,
    pub terminal_label: String,
    pub validity_period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQrResponse {
    pub qr_content: Option<String>,
    pub qr_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub original_partner_reference_no: String,
    pub original_reference_no: String,
    pub service_code: String,
}

impl StatusRequest {
    pub fn new(reference: &str, qr_id: &str) -> Self {
        Self {
            original_partner_reference_no: reference.to_string(),
            original_reference_no: qr_id.to_string(),
            service_code: STATUS_SERVICE_CODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusAmount {
    pub value: Option<NumberOrString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub transaction_status_code: Option<String>,
    pub transaction_date: Option<String>,
    pub reference_no: Option<String>,
    pub amount: Option<StatusAmount>,
}

impl StatusResponse {
    pub fn into_snapshot(self, qr_id: &str) -> Result<RemoteStatusSnapshot> {
        let code = self.transaction_status_code.ok_or_else(|| {
            GatewayError::MalformedResponse("missing transactionStatusCode".into())
        })?;

        let mut snapshot = RemoteStatusSnapshot::from_code(qr_id, code);
        snapshot.transaction_id = self.reference_no;
        snapshot.paid_at = parse_timestamp(self.transaction_date.as_deref())?;
        snapshot.amount = match self.amount.and_then(|a| a.value) {
            Some(value) => Some(value.as_decimal().ok_or_else(|| {
                GatewayError::MalformedResponse("amount.value is not a decimal".into())
            })?),
            None => None,
        };

        Ok(snapshot)
    }
}

/// Body of a payment notification pushed by the bank.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub qr_id: Option<String>,
    pub original_reference_no: Option<String>,
    pub transaction_status_code: Option<String>,
    pub reference_no: Option<String>,
    pub transaction_date: Option<String>,
}

impl WebhookNotification {
    /// `qrId` wins over `originalReferenceNo` when both are present.
    pub fn qr_id(&self) -> Option<&str> {
        non_empty(&self.qr_id).or_else(|| non_empty(&self.original_reference_no))
    }

    pub fn into_snapshot(self) -> Result<RemoteStatusSnapshot> {
        let qr_id = self
            .qr_id()
            .ok_or_else(|| GatewayError::InvalidInput("missing qrId".into()))?
            .to_string();
        let code = self
            .transaction_status_code
            .ok_or_else(|| GatewayError::InvalidInput("missing transactionStatusCode".into()))?;

        let mut snapshot = RemoteStatusSnapshot::from_code(qr_id, code);
        snapshot.transaction_id = self.reference_no;
        snapshot.paid_at = parse_timestamp(self.transaction_date.as_deref())
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
        Ok(snapshot)
    }
}

fn non_empty(id: &Option<String>) -> Option<&str> {
    id.as_deref().filter(|id| !id.trim().is_empty())
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| GatewayError::MalformedResponse(format!("bad transactionDate {}", raw))),
        _ => Ok(None),
    }
}
