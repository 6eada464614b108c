pub mod api;
pub mod payment;

pub use payment::{AccessToken, Credential, PaymentRecord, PaymentStatus, RemoteStatusSnapshot};
