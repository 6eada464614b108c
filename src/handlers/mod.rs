pub mod metrics;
pub mod payments;

use crate::error::GatewayError;
use crate::services::PaymentService;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::error;

/// Routes served in front of the payment core.
pub fn router(service: Arc<PaymentService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/qris", post(payments::create_payment))
        .route("/qris/webhook", post(payments::webhook))
        .route("/qris/:qr_id/status", get(payments::get_status))
        .route("/metrics", get(metrics::get_metrics))
        .with_state(service)
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Wraps a [`GatewayError`] so handlers can bubble it up with `?`.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(serde_json::json!({
            "success": false,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
