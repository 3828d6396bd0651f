mod chapa;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;

pub use chapa::ChapaGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("payment gateway transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalServiceFailure
    }

    /// Timeouts and transport errors say nothing about the payment itself,
    /// so the caller may retry them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Transport(_))
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InitializeRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub tx_ref: String,
    pub callback_url: String,
    pub return_url: String,
}

impl InitializeRequest {
    /// Splits a display name into the first/last pair the gateway expects.
    pub fn split_name(full_name: &str) -> (String, String) {
        let mut parts = full_name.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayVerdict {
    Success,
    Failed,
    Pending,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: &InitializeRequest) -> GatewayResult<Checkout>;
    async fn verify(&self, tx_ref: &str) -> GatewayResult<GatewayVerdict>;
}

/// Renders integer minor units the way the gateway expects amounts, e.g.
/// `10050` becomes `"100.50"`.
pub fn format_amount(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
