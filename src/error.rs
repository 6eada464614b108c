use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every failure the gateway core can surface to a caller.
///
/// The enum is `Clone` because a failed single-flight token refresh is handed
/// to every task that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("reference {0} already exists")]
    DuplicateReference(String),

    #[error("token request rejected (HTTP {status}): {body}")]
    AuthFailure { status: u16, body: String },

    #[error("gateway returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("payment still pending after {attempts} status checks")]
    PollTimeout { attempts: u32 },

    #[error("polling cancelled before a terminal status was observed")]
    PollCancelled,

    #[error("webhook signature mismatch")]
    SignatureMismatch,

    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),
}

impl GatewayError {
    /// Status code the inbound router answers with for this failure.
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::DuplicateReference(_) => StatusCode::CONFLICT,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            GatewayError::PollTimeout { .. } | GatewayError::PollCancelled => {
                StatusCode::REQUEST_TIMEOUT
            }
            GatewayError::AuthFailure { .. }
            | GatewayError::Remote { .. }
            | GatewayError::MalformedResponse(_)
            | GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) | GatewayError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a poll attempt that failed this way may be followed by another one.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::MalformedResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::MalformedResponse(e.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(e: url::ParseError) -> Self {
        GatewayError::Config(format!("invalid URL: {}", e))
    }
}
