use crate::error::{GatewayError, Result};
use crate::models::payment::{AccessToken, Credential};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anything able to mint a fresh bearer token for a credential.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, credential: &Credential) -> Result<AccessToken>;
}

type InFlight = Shared<BoxFuture<'static, std::result::Result<AccessToken, GatewayError>>>;

#[derive(Default)]
struct Slot {
    token: Option<AccessToken>,
    in_flight: Option<InFlight>,
    generation: u64,
}

/// One cached bearer token per `client_id`, refreshed single-flight.
///
/// Concurrent callers that find no fresh token all await the same shared
/// fetch. The per-credential mutex is only held while inspecting the slot,
/// never across the network call, so unrelated credentials refresh in parallel.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    margin: Duration,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, margin: Duration) -> Self {
        Self {
            source,
            margin,
            slots: DashMap::new(),
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    fn slot(&self, client_id: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn get_token(&self, credential: &Credential) -> Result<AccessToken> {
        let slot = self.slot(&credential.client_id);

        let in_flight = {
            let mut guard = slot.lock();

            if let Some(token) = &guard.token {
                if token.is_fresh(Utc::now(), self.margin) {
                    return Ok(token.clone());
                }
                debug!("Cached token for {} is inside the safety margin", credential.client_id);
                guard.token = None;
            }

            match &guard.in_flight {
                Some(fut) => fut.clone(),
                None => {
                    let fut = self.refresh(slot.clone(), credential.clone(), guard.generation);
                    guard.in_flight = Some(fut.clone());
                    fut
                }
            }
        };

        in_flight.await
    }

    fn refresh(&self, slot: Arc<Mutex<Slot>>, credential: Credential, generation: u64) -> InFlight {
        let source = Arc::clone(&self.source);

        async move {
            info!("Requesting access token for {}", credential.client_id);
            // A panicking source must not poison the shared future for later callers
            let result = AssertUnwindSafe(source.fetch_token(&credential))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(GatewayError::Transport("token refresh aborted".into()))
                });

            let mut guard = slot.lock();
            // A clear() during the fetch bumps the generation and drops this result.
            if guard.generation == generation {
                guard.in_flight = None;
                match &result {
                    Ok(token) => guard.token = Some(token.clone()),
                    Err(e) => warn!("Token refresh for {} failed: {}", credential.client_id, e),
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Drops the cached token so the next `get_token` refreshes.
    pub fn clear(&self, credential: &Credential) {
        if let Some(slot) = self.slots.get(&credential.client_id) {
            let mut guard = slot.lock();
            guard.token = None;
            guard.in_flight = None;
            guard.generation += 1;
            info!("Cleared cached token for {}", credential.client_id);
        }
    }

    /// Currently cached token, fresh or not.
    pub fn peek(&self, credential: &Credential) -> Option<AccessToken> {
        let slot = self.slots.get(&credential.client_id)?;
        let token = slot.lock().token.clone();
        token
    }
}
