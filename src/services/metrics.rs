use crate::models::payment::PaymentStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters shared by the webhook and poll paths.
#[derive(Default)]
pub struct AtomicMetrics {
    created: AtomicU64,
    completed: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
    webhooks_accepted: AtomicU64,
    webhooks_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub completed: u64,
    pub expired: u64,
    pub failed: u64,
    pub webhooks_accepted: u64,
    pub webhooks_rejected: u64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a transition into a terminal status.
    pub fn record_transition(&self, status: PaymentStatus) {
        let counter = match status {
            PaymentStatus::Completed => &self.completed,
            PaymentStatus::Expired => &self.expired,
            PaymentStatus::Failed => &self.failed,
            PaymentStatus::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_webhook_accepted(&self) {
        self.webhooks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_webhook_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            webhooks_accepted: self.webhooks_accepted.load(Ordering::Relaxed),
            webhooks_rejected: self.webhooks_rejected.load(Ordering::Relaxed),
        }
    }
}
