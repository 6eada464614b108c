use crate::error::{GatewayError, Result};
use crate::models::api::WebhookNotification;
use crate::models::payment::{PaymentRecord, RemoteStatusSnapshot};
use crate::services::gateway_client::GatewayClient;
use crate::services::metrics::{AtomicMetrics, MetricsSnapshot};
use crate::services::poller::{PollPolicy, Poller};
use crate::services::reconciler::{ReconcileOutcome, StatusReconciler};
use crate::services::signature::SignatureCodec;
use crate::services::store::PaymentStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Entry point shared by every transport: CLI, HTTP handlers, webhooks.
pub struct PaymentService {
    gateway: Arc<GatewayClient>,
    store: Arc<dyn PaymentStore>,
    poller: Poller,
    reconciler: StatusReconciler,
    metrics: Arc<AtomicMetrics>,
    webhook_secret: Option<String>,
}

impl PaymentService {
    pub fn new(gateway: Arc<GatewayClient>) -> Self {
        let store = Arc::clone(gateway.store());
        let metrics = Arc::new(AtomicMetrics::new());
        let poller = Poller::new(gateway.clone(), store.clone()).with_metrics(metrics.clone());

        let config = gateway.config();
        let webhook_secret = config
            .verify_webhook_signature
            .then(|| config.client_secret.clone());
        if webhook_secret.is_none() {
            warn!("Webhook signature verification is disabled");
        }

        Self {
            gateway,
            store,
            poller,
            reconciler: StatusReconciler::new(),
            metrics,
            webhook_secret,
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn create_payment(
        &self,
        amount: Decimal,
        reference: &str,
        callback_url: Option<&str>,
    ) -> Result<PaymentRecord> {
        let record = self
            .gateway
            .create_payment(amount, reference, callback_url)
            .await?;
        self.metrics.increment_created();
        Ok(record)
    }

    pub async fn get_payment(&self, qr_id: &str) -> Result<PaymentRecord> {
        self.store
            .find_by_qr_id(qr_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(qr_id.to_string()))
    }

    /// Local-first status lookup: terminal records are answered from the store,
    /// pending ones are checked remotely and reconciled.
    pub async fn refresh_status(&self, qr_id: &str) -> Result<ReconcileOutcome> {
        let current = self.get_payment(qr_id).await?;
        if current.status.is_terminal() {
            return Ok(ReconcileOutcome {
                record: current,
                changed: false,
            });
        }

        let observed = self
            .gateway
            .check_status(&current.qr_id, &current.reference)
            .await?;
        self.reconcile(current, &observed).await
    }

    /// Verifies, decodes and applies one webhook delivery.
    ///
    /// Redelivery of the same notification is harmless: the second call
    /// returns the stored record with `changed == false`.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let result = self.process_webhook(body, signature).await;
        match &result {
            Ok(_) => self.metrics.increment_webhook_accepted(),
            Err(e) => {
                self.metrics.increment_webhook_rejected();
                warn!("Webhook rejected: {}", e);
            }
        }
        result
    }

    async fn process_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        if let Some(secret) = &self.webhook_secret {
            let signature = signature.ok_or(GatewayError::SignatureMismatch)?;
            if !SignatureCodec::verify_hex(body, signature, secret.as_bytes()) {
                return Err(GatewayError::SignatureMismatch);
            }
        }

        let notification: WebhookNotification = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidInput(format!("invalid webhook body: {}", e)))?;
        let observed = notification.into_snapshot()?;

        let current = self.get_payment(&observed.qr_id).await?;
        info!(
            "Webhook for {} reports code {}",
            current.reference, observed.code
        );
        self.reconcile(current, &observed).await
    }

    /// Polls the bank for `qr_id` until terminal, the attempt budget, or `deadline`.
    pub async fn poll(
        &self,
        qr_id: &str,
        policy: PollPolicy,
        deadline: Option<Instant>,
    ) -> Result<PaymentRecord> {
        let current = self.get_payment(qr_id).await?;
        match deadline {
            Some(deadline) => {
                self.poller
                    .poll_until(&current.qr_id, &current.reference, policy, deadline)
                    .await
            }
            None => {
                self.poller
                    .poll(&current.qr_id, &current.reference, policy)
                    .await
            }
        }
    }

    async fn reconcile(
        &self,
        current: PaymentRecord,
        observed: &RemoteStatusSnapshot,
    ) -> Result<ReconcileOutcome> {
        let outcome = self
            .reconciler
            .apply_and_store(self.store.as_ref(), current, observed)
            .await?;
        if outcome.changed {
            self.metrics.record_transition(outcome.record.status);
        }
        Ok(outcome)
    }
}
