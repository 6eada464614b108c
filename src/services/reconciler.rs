use crate::error::{GatewayError, Result};
use crate::models::payment::{PaymentRecord, PaymentStatus, RemoteStatusSnapshot};
use crate::services::store::PaymentStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Updated(PaymentRecord),
    NoChange,
}

/// Result of reconciling one observation against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub record: PaymentRecord,
    /// `true` only for the caller whose write actually landed.
    pub changed: bool,
}

/// Folds an observed remote status into a local record.
///
/// Both the webhook and the poll path go through [`StatusReconciler::apply`].
/// Terminal statuses are sticky: once a record left `PENDING`, nothing moves it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReconciler;

impl StatusReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, current: &PaymentRecord, observed: &RemoteStatusSnapshot) -> Reconciliation {
        self.apply_at(current, observed, Utc::now())
    }

    pub fn apply_at(
        &self,
        current: &PaymentRecord,
        observed: &RemoteStatusSnapshot,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        if current.status.is_terminal() {
            debug!(
                "Ignoring {} for {}: already {}",
                observed.status, current.reference, current.status
            );
            return Reconciliation::NoChange;
        }

        if observed.status == PaymentStatus::Pending {
            return Reconciliation::NoChange;
        }

        let mut updated = current.clone();
        updated.status = observed.status;
        updated.updated_at = Some(now);

        if observed.status == PaymentStatus::Completed {
            updated.transaction_id = observed.transaction_id.clone();
            updated.paid_at = Some(observed.paid_at.unwrap_or(now));
        }

        info!(
            "Payment {} moved {} -> {} (code {})",
            current.reference, current.status, updated.status, observed.code
        );
        Reconciliation::Updated(updated)
    }

    /// Applies `observed` and persists the result with a compare-and-set.
    ///
    /// When another writer got there first the stored record is returned
    /// with `changed == false`.
    pub async fn apply_and_store(
        &self,
        store: &dyn PaymentStore,
        current: PaymentRecord,
        observed: &RemoteStatusSnapshot,
    ) -> Result<ReconcileOutcome> {
        let updated = match self.apply(&current, observed) {
            Reconciliation::NoChange => {
                return Ok(ReconcileOutcome {
                    record: current,
                    changed: false,
                })
            }
            Reconciliation::Updated(updated) => updated,
        };

        if store.update_status(&updated).await? {
            return Ok(ReconcileOutcome {
                record: updated,
                changed: true,
            });
        }

        debug!("Lost status race for {}", updated.reference);
        let stored = store
            .find_by_reference(&updated.reference)
            .await?
            .ok_or_else(|| GatewayError::NotFound(updated.reference.clone()))?;
        Ok(ReconcileOutcome {
            record: stored,
            changed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryPaymentStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn pending() -> PaymentRecord {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        PaymentRecord {
            qr_id: "qr-1".into(),
            reference: "ORDER-1".into(),
            qr_string: "000201".into(),
            qr_image_url: "https://example.test/qr".into(),
            amount: dec!(25000),
            status: PaymentStatus::Pending,
            transaction_id: None,
            paid_at: None,
            expires_at: created + chrono::Duration::minutes(30),
            created_at: created,
            updated_at: None,
        }
    }

    #[test]
    fn test_completed_sets_transaction_and_paid_at() {
        let reconciler = StatusReconciler::new();
        let mut observed = RemoteStatusSnapshot::from_code("qr-1", "00");
        observed.transaction_id = Some("TRX-1".into());

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap();
        let Reconciliation::Updated(record) = reconciler.apply_at(&pending(), &observed, now) else {
            panic!("expected an update");
        };

        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.transaction_id.as_deref(), Some("TRX-1"));
        assert_eq!(record.paid_at, Some(now));
        assert_eq!(record.updated_at, Some(now));
    }

    #[test]
    fn test_remote_paid_at_wins_over_now() {
        let paid = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();
        let mut observed = RemoteStatusSnapshot::from_code("qr-1", "00");
        observed.paid_at = Some(paid);

        match StatusReconciler::new().apply(&pending(), &observed) {
            Reconciliation::Updated(record) => assert_eq!(record.paid_at, Some(paid)),
            Reconciliation::NoChange => panic!("expected an update"),
        }
    }

    #[test]
    fn test_pending_observation_is_no_change() {
        let observed = RemoteStatusSnapshot::from_code("qr-1", "03");
        assert_eq!(
            StatusReconciler::new().apply(&pending(), &observed),
            Reconciliation::NoChange
        );
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let reconciler = StatusReconciler::new();
        let mut completed = pending();
        completed.status = PaymentStatus::Completed;

        for code in ["00", "03", "05", "99", ""] {
            let observed = RemoteStatusSnapshot::from_code("qr-1", code);
            assert_eq!(reconciler.apply(&completed, &observed), Reconciliation::NoChange);
        }
    }

    #[test]
    fn test_expired_and_failed_do_not_touch_payment_fields() {
        let reconciler = StatusReconciler::new();
        for (code, status) in [("05", PaymentStatus::Expired), ("XX", PaymentStatus::Failed)] {
            let mut observed = RemoteStatusSnapshot::from_code("qr-1", code);
            observed.transaction_id = Some("ignored".into());

            let Reconciliation::Updated(record) = reconciler.apply(&pending(), &observed) else {
                panic!("expected an update");
            };
            assert_eq!(record.status, status);
            assert!(record.transaction_id.is_none());
            assert!(record.paid_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_apply_and_store_writes_once() {
        let store = InMemoryPaymentStore::new();
        store.insert(pending()).await.unwrap();
        let reconciler = StatusReconciler::new();
        let observed = RemoteStatusSnapshot::from_code("qr-1", "05");

        // Both observers read the record while it was still pending
        let first = reconciler
            .apply_and_store(&store, pending(), &observed)
            .await
            .unwrap();
        let second = reconciler
            .apply_and_store(&store, pending(), &RemoteStatusSnapshot::from_code("qr-1", "00"))
            .await
            .unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.record.status, PaymentStatus::Expired);
    }
}
