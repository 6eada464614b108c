pub mod auth_client;
pub mod gateway_client;
pub mod metrics;
pub mod payment_service;
pub mod poller;
pub mod reconciler;
pub mod signature;
pub mod store;
pub mod token_cache;

pub use gateway_client::GatewayClient;
pub use payment_service::PaymentService;
pub use poller::{PollPolicy, Poller, StatusSource};
pub use reconciler::{ReconcileOutcome, StatusReconciler};
pub use signature::SignatureCodec;
pub use store::{InMemoryPaymentStore, PaymentStore};
pub use token_cache::{TokenCache, TokenSource};
