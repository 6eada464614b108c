use crate::error::{GatewayError, Result};
use crate::models::payment::PaymentRecord;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// Persistence port for payment records.
///
/// `update_status` is a compare-and-set: it writes only while the stored record
/// is still non-terminal and reports whether it wrote. Webhook delivery and
/// polling may race on the same record; the loser gets `false`.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>>;
    async fn find_by_qr_id(&self, qr_id: &str) -> Result<Option<PaymentRecord>>;
    /// Fails with `DuplicateReference` when the reference is already stored,
    /// and with `Store` when the QR id is already mapped to another record.
    async fn insert(&self, record: PaymentRecord) -> Result<()>;
    async fn update_status(&self, record: &PaymentRecord) -> Result<bool>;

    async fn exists(&self, reference: &str) -> Result<bool> {
        Ok(self.find_by_reference(reference).await?.is_some())
    }
}

pub type PaymentStorage = Arc<DashMap<String, PaymentRecord>>;

/// In-process store keyed by reference, with a secondary QR id index.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    records: PaymentStorage,
    by_qr_id: Arc<DashMap<String, String>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>> {
        Ok(self.records.get(reference).map(|entry| entry.clone()))
    }

    async fn find_by_qr_id(&self, qr_id: &str) -> Result<Option<PaymentRecord>> {
        let reference = match self.by_qr_id.get(qr_id) {
            Some(reference) => reference.clone(),
            None => return Ok(None),
        };
        self.find_by_reference(&reference).await
    }

    async fn insert(&self, record: PaymentRecord) -> Result<()> {
        // Lock order: records, then by_qr_id
        let slot = match self.records.entry(record.reference.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::DuplicateReference(record.reference)),
            Entry::Vacant(slot) => slot,
        };

        match self.by_qr_id.entry(record.qr_id.clone()) {
            Entry::Occupied(existing) => {
                warn!(
                    "QR id {} already belongs to {}, rejecting {}",
                    record.qr_id,
                    existing.get(),
                    record.reference
                );
                Err(GatewayError::Store(format!(
                    "qr id {} already in use",
                    record.qr_id
                )))
            }
            Entry::Vacant(index) => {
                index.insert(record.reference.clone());
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update_status(&self, record: &PaymentRecord) -> Result<bool> {
        let mut current = self
            .records
            .get_mut(&record.reference)
            .ok_or_else(|| GatewayError::NotFound(record.reference.clone()))?;

        if current.status.is_terminal() {
            return Ok(false);
        }

        *current = record.clone();
        Ok(true)
    }
}
