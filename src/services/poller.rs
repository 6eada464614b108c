use crate::error::{GatewayError, Result};
use crate::models::payment::{PaymentRecord, RemoteStatusSnapshot};
use crate::services::metrics::AtomicMetrics;
use crate::services::reconciler::StatusReconciler;
use crate::services::store::PaymentStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Read-only status lookup, safe to repeat.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn check_status(&self, qr_id: &str, reference: &str) -> Result<RemoteStatusSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Wait before the given attempt (1-based). Fixed for now.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.interval
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(60, Duration::from_secs(5))
    }
}

/// Repeats status checks until the record turns terminal or the budget runs out.
pub struct Poller {
    source: Arc<dyn StatusSource>,
    store: Arc<dyn PaymentStore>,
    reconciler: StatusReconciler,
    metrics: Option<Arc<AtomicMetrics>>,
}

impl Poller {
    pub fn new(source: Arc<dyn StatusSource>, store: Arc<dyn PaymentStore>) -> Self {
        Self {
            source,
            store,
            reconciler: StatusReconciler::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AtomicMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn poll(&self, qr_id: &str, reference: &str, policy: PollPolicy) -> Result<PaymentRecord> {
        let mut attempts = 0;

        while attempts < policy.max_attempts {
            attempts += 1;
            let delay = policy.delay_before(attempts);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let current = self
                .store
                .find_by_reference(reference)
                .await?
                .ok_or_else(|| GatewayError::NotFound(reference.to_string()))?;

            // Um webhook pode ter chegado entre duas tentativas
            if current.status.is_terminal() {
                return Ok(current);
            }

            let observed = match self.source.check_status(qr_id, reference).await {
                Ok(observed) => observed,
                Err(e) if e.is_transient() => {
                    warn!("Status check {}/{} for {} failed: {}", attempts, policy.max_attempts, qr_id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(record) = self.commit(current, &observed).await? {
                info!("Poll for {} finished after {} attempts: {}", qr_id, attempts, record.status);
                return Ok(record);
            }
            debug!("Attempt {}/{} for {}: still pending", attempts, policy.max_attempts, qr_id);
        }

        Err(GatewayError::PollTimeout { attempts })
    }

    /// Same as [`Poller::poll`], abandoned at `deadline` if still running.
    ///
    /// Dropping the inner future cancels any pending sleep or request.
    pub async fn poll_until(
        &self,
        qr_id: &str,
        reference: &str,
        policy: PollPolicy,
        deadline: Instant,
    ) -> Result<PaymentRecord> {
        match timeout_at(deadline, self.poll(qr_id, reference, policy)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Poll for {} cancelled at caller deadline", qr_id);
                Err(GatewayError::PollCancelled)
            }
        }
    }

    async fn commit(
        &self,
        current: PaymentRecord,
        observed: &RemoteStatusSnapshot,
    ) -> Result<Option<PaymentRecord>> {
        let outcome = self
            .reconciler
            .apply_and_store(self.store.as_ref(), current, observed)
            .await?;

        if outcome.changed {
            if let Some(metrics) = &self.metrics {
                metrics.record_transition(outcome.record.status);
            }
        }

        Ok(outcome
            .record
            .status
            .is_terminal()
            .then_some(outcome.record))
    }
}
