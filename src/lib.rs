pub mod app;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{GatewayError, Result};
