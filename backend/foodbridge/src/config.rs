//! Application configuration loaded from environment variables.

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Brevo transactional email endpoint
    pub brevo_api_url: String,
    /// Brevo API key. Emails are skipped when unset.
    pub brevo_api_key: Option<String>,
    pub templates: TemplateIds,
    /// Timeout applied to outbound HTTP calls
    pub http_timeout_secs: u64,
    /// Buffered change notifications per subscriber before it must re-sync
    pub change_feed_capacity: usize,
}

/// Brevo template ids for each notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateIds {
    pub claim: i64,
    pub receipt: i64,
    pub fulfillment: i64,
}

impl Default for TemplateIds {
    fn default() -> Self {
        Self {
            claim: 1,
            receipt: 2,
            fulfillment: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./foodbridge.db".to_string()),
            api_port: parse_var("API_PORT", "10000")?,
            brevo_api_url: env_var("BREVO_API_URL")
                .unwrap_or_else(|_| "https://api.brevo.com/v3/smtp/email".to_string()),
            brevo_api_key: env_var("BREVO_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            templates: TemplateIds {
                claim: parse_var("BREVO_CLAIM_TEMPLATE_ID", "1")?,
                receipt: parse_var("BREVO_RECEIPT_TEMPLATE_ID", "2")?,
                fulfillment: parse_var("BREVO_FULFILLMENT_TEMPLATE_ID", "3")?,
            },
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", "30")?,
            change_feed_capacity: parse_var("CHANGE_FEED_CAPACITY", "256")?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid {key}")))
}
