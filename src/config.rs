//! Environment-backed configuration, validated once at startup.
//!
//! Gateway secrets are required: a missing merchant key or salt aborts boot
//! instead of surfacing mid-request when the first payment comes through.

use std::env;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub app_base_url: String,
    pub nats_url: Option<String>,
    pub admin_notify_email: String,
    pub payu: PayuConfig,
}

/// Merchant-side PayU parameters. `base_url` switches sandbox vs production.
#[derive(Debug, Clone)]
pub struct PayuConfig {
    pub merchant_key: String,
    pub merchant_salt: String,
    pub base_url: String,
    pub success_url: String,
    pub failure_url: String,
    pub cancel_url: String,
}

impl PayuConfig {
    pub fn payment_url(&self) -> String {
        format!("{}/_payment", self.base_url.trim_end_matches('/'))
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let require = |name: &str| {
            env::var(name)
                .map_err(|_| AppError::Config(format!("missing environment variable '{name}'")))
        };

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8083".to_string())
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("invalid PORT: {e}")))?;
        let database_url = require("DATABASE_URL")?;
        let app_base_url =
            env::var("APP_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));
        let nats_url = env::var("NATS_URL").ok();
        let admin_notify_email =
            env::var("ADMIN_NOTIFY_EMAIL").unwrap_or_else(|_| "orders@sable.example".to_string());

        let merchant_key = require("PAYU_MERCHANT_KEY")?;
        let merchant_salt = require("PAYU_MERCHANT_SALT")?;
        if merchant_key.trim().is_empty() || merchant_salt.trim().is_empty() {
            return Err(AppError::Config(
                "PAYU_MERCHANT_KEY / PAYU_MERCHANT_SALT must be non-empty".to_string(),
            ));
        }
        let base_url = env::var("PAYU_BASE_URL")
            .unwrap_or_else(|_| "https://sandboxsecure.payu.in".to_string());
        let callback = |name: &str, path: &str| {
            env::var(name).unwrap_or_else(|_| format!("{app_base_url}/api/v1/payments/{path}"))
        };
        let payu = PayuConfig {
            merchant_key,
            merchant_salt,
            base_url,
            success_url: callback("PAYMENT_SUCCESS_URL", "return"),
            failure_url: callback("PAYMENT_FAILURE_URL", "return"),
            cancel_url: callback("PAYMENT_CANCEL_URL", "return"),
        };

        tracing::info!(gateway = %payu.base_url, "configuration loaded");
        Ok(Self {
            port,
            database_url,
            app_base_url,
            nats_url,
            admin_notify_email,
            payu,
        })
    }
}
