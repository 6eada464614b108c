use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::services::metrics::MetricsSnapshot;
use crate::services::PaymentService;

pub async fn get_metrics(State(service): State<Arc<PaymentService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics())
}
