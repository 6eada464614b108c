use crate::error::{GatewayError, Result};
use crate::models::payment::Credential;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.bankmandiri.co.id";
pub const PRODUCTION_BASE_URL: &str = "https://api.bankmandiri.co.id";

pub const MIN_QR_EXPIRY_MINUTES: u32 = 5;
pub const MAX_QR_EXPIRY_MINUTES: u32 = 120;

pub const MAX_TOKEN_MARGIN_SECS: u64 = 3600;
pub const MIN_HTTP_TIMEOUT_SECS: u64 = 1;
pub const MAX_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => SANDBOX_BASE_URL,
            Environment::Production => PRODUCTION_BASE_URL,
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => Err(GatewayError::Config(format!(
                "environment must be 'sandbox' or 'production', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MerchantProfile {
    pub nmid: String,
    pub name: String,
    pub city: String,
}

/// Process-wide settings. Built once and shared behind an `Arc`; never mutated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    /// Replaces the environment's base URL (staging hosts, local fakes).
    pub base_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub merchant: MerchantProfile,
    pub qr_expiry_minutes: u32,
    pub http_timeout_secs: u64,
    pub token_margin_secs: u64,
    pub verify_webhook_signature: bool,
    pub server_port: u16,
    pub poll_max_attempts: u32,
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            base_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            merchant: MerchantProfile::default(),
            qr_expiry_minutes: 30,
            http_timeout_secs: 30,
            token_margin_secs: 60,
            verify_webhook_signature: true,
            server_port: 8080,
            poll_max_attempts: 60,
            poll_interval_secs: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let environment = match env::var("QRIS_ENVIRONMENT") {
            Ok(raw) => Environment::parse(&raw)?,
            Err(_) => defaults.environment,
        };

        let config = Self {
            environment,
            base_url: env::var("QRIS_BASE_URL").ok().filter(|v| !v.is_empty()),
            client_id: env::var("QRIS_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("QRIS_CLIENT_SECRET").unwrap_or_default(),
            merchant: MerchantProfile {
                nmid: env::var("QRIS_MERCHANT_NMID").unwrap_or_default(),
                name: env::var("QRIS_MERCHANT_NAME")
                    .unwrap_or_else(|_| "Toko Online".to_string()),
                city: env::var("QRIS_MERCHANT_CITY").unwrap_or_else(|_| "Jakarta".to_string()),
            },
            qr_expiry_minutes: env_or("QRIS_EXPIRY_MINUTES", defaults.qr_expiry_minutes)?,
            http_timeout_secs: env_or("QRIS_TIMEOUT", defaults.http_timeout_secs)?,
            token_margin_secs: env_or("QRIS_TOKEN_MARGIN", defaults.token_margin_secs)?,
            verify_webhook_signature: env_or(
                "QRIS_VERIFY_WEBHOOK_SIGNATURE",
                defaults.verify_webhook_signature,
            )?,
            server_port: env_or("PORT", defaults.server_port)?,
            poll_max_attempts: env_or("QRIS_POLL_MAX_ATTEMPTS", defaults.poll_max_attempts)?,
            poll_interval_secs: env_or("QRIS_POLL_INTERVAL", defaults.poll_interval_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("merchant.nmid", &self.merchant.nmid),
            ("merchant.name", &self.merchant.name),
            ("merchant.city", &self.merchant.city),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(GatewayError::Config(format!(
                    "missing required configuration: {}",
                    field
                )));
            }
        }

        if !(MIN_QR_EXPIRY_MINUTES..=MAX_QR_EXPIRY_MINUTES).contains(&self.qr_expiry_minutes) {
            return Err(GatewayError::Config(format!(
                "qr_expiry_minutes must be between {} and {}",
                MIN_QR_EXPIRY_MINUTES, MAX_QR_EXPIRY_MINUTES
            )));
        }

        if let Some(base_url) = &self.base_url {
            url::Url::parse(base_url)?;
        }

        if self.token_margin_secs > MAX_TOKEN_MARGIN_SECS {
            return Err(GatewayError::Config(format!(
                "token_margin_secs must be at most {}",
                MAX_TOKEN_MARGIN_SECS
            )));
        }

        if !(MIN_HTTP_TIMEOUT_SECS..=MAX_HTTP_TIMEOUT_SECS).contains(&self.http_timeout_secs) {
            return Err(GatewayError::Config(format!(
                "http_timeout_secs must be between {} and {}",
                MIN_HTTP_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_SECS
            )));
        }

        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
            .trim_end_matches('/')
    }

    pub fn credential(&self) -> Credential {
        Credential::new(&self.client_id, &self.client_secret)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn token_margin(&self) -> chrono::Duration {
        let secs = self.token_margin_secs.min(MAX_TOKEN_MARGIN_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn qr_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.qr_expiry_minutes as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Missing variables fall back to `default`; present but unparsable ones are errors.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            GatewayError::Config(format!("{} has an invalid value: '{}'", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
