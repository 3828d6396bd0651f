use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    format_amount, Checkout, GatewayError, GatewayResult, GatewayVerdict, InitializeRequest,
    PaymentGateway,
};
use crate::config::GatewaySection;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    #[serde(default)]
    status: Option<String>,
}

/// Chapa REST client. Every request carries the bearer secret and the
/// configured timeout.
#[derive(Clone)]
pub struct ChapaGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for ChapaGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapaGateway")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChapaGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            timeout,
        })
    }

    pub fn from_config(section: &GatewaySection, secret_key: impl Into<String>) -> GatewayResult<Self> {
        Self::new(section.base_url.clone(), secret_key, section.timeout())
    }

    fn map_transport(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl PaymentGateway for ChapaGateway {
    async fn initialize(&self, request: &InitializeRequest) -> GatewayResult<Checkout> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let payload = json!({
            "amount": format_amount(request.amount_cents),
            "currency": request.currency,
            "email": request.email,
            "first_name": request.first_name,
            "last_name": request.last_name,
            "tx_ref": request.tx_ref,
            "callback_url": request.callback_url,
            "return_url": request.return_url,
        });
        debug!(tx_ref = %request.tx_ref, "initializing gateway checkout");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let status = response.status();
        let body: Envelope<InitializeData> = response
            .json()
            .await
            .map_err(|err| self.map_transport(err))?;
        if !status.is_success() || body.status.as_deref() != Some("success") {
            let message = body
                .message
                .map(|value| value.to_string())
                .unwrap_or_else(|| "initialization rejected".to_string());
            warn!(tx_ref = %request.tx_ref, status = status.as_u16(), %message, "gateway rejected checkout");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let data = body
            .data
            .ok_or_else(|| GatewayError::Malformed("missing checkout data".into()))?;
        if data.checkout_url.trim().is_empty() {
            return Err(GatewayError::Malformed("empty checkout_url".into()));
        }
        Ok(Checkout {
            checkout_url: data.checkout_url,
        })
    }

    async fn verify(&self, tx_ref: &str) -> GatewayResult<GatewayVerdict> {
        let url = format!("{}/transaction/verify/{}", self.base_url, tx_ref);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: "gateway unavailable".into(),
            });
        }
        let body: Envelope<VerifyData> = response
            .json()
            .await
            .map_err(|err| self.map_transport(err))?;
        let data_status = body.data.and_then(|data| data.status);
        let verdict = match (body.status.as_deref(), data_status.as_deref()) {
            (Some("success"), Some("success")) => GatewayVerdict::Success,
            (_, Some("failed")) | (_, Some("cancelled")) => GatewayVerdict::Failed,
            _ => GatewayVerdict::Pending,
        };
        debug!(tx_ref, ?verdict, http_status = status.as_u16(), "gateway verification");
        Ok(verdict)
    }
}
