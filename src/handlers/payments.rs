use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::ApiError;
use crate::services::PaymentService;

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

pub async fn create_payment(
    State(service): State<Arc<PaymentService>>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let reference = body
        .reference
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!("Received QR request {}", reference);

    let record = service
        .create_payment(body.amount, &reference, body.callback_url.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": record,
        })),
    ))
}

pub async fn get_status(
    State(service): State<Arc<PaymentService>>,
    Path(qr_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let outcome = service.refresh_status(&qr_id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "data": outcome.record,
        "changed": outcome.changed,
    })))
}

/// Raw body is kept as bytes: the signature covers it exactly as sent.
pub async fn webhook(
    State(service): State<Arc<PaymentService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = service.handle_webhook(&body, signature).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "status": outcome.record.status,
        "changed": outcome.changed,
    })))
}
