use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::booking::{transaction_reference, BookingError, BookingResult, Buyer, CheckoutSettings};
use crate::config::SubscriptionSection;
use crate::mail::{subscription_confirmation, Mailer};
use crate::payment::{GatewayError, GatewayVerdict, InitializeRequest, PaymentGateway};
use crate::store::{
    PlanType, SqliteStore, Subscription, SubscriptionRequest, Transaction, TransactionKind,
    TransactionStatus,
};
use crate::ticket::QrRenderer;

#[derive(Debug, Clone, Copy)]
pub struct PlanPricing {
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
}

impl PlanPricing {
    pub fn price(&self, plan: PlanType) -> i64 {
        match plan {
            PlanType::Monthly => self.monthly_price_cents,
            PlanType::Annual => self.annual_price_cents,
        }
    }
}

impl From<&SubscriptionSection> for PlanPricing {
    fn from(section: &SubscriptionSection) -> Self {
        Self {
            monthly_price_cents: section.monthly_price_cents,
            annual_price_cents: section.annual_price_cents,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionCheckout {
    pub subscription: Subscription,
    pub transaction: Transaction,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionVerification {
    pub tx_ref: String,
    pub subscription_id: i64,
    pub status: TransactionStatus,
    pub plan: PlanType,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: SqliteStore,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    qr: QrRenderer,
    settings: CheckoutSettings,
    pricing: PlanPricing,
}

impl SubscriptionService {
    pub fn new(
        store: SqliteStore,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        qr: QrRenderer,
        settings: CheckoutSettings,
        pricing: PlanPricing,
    ) -> Self {
        Self {
            store,
            gateway,
            mailer,
            qr,
            settings,
            pricing,
        }
    }

    /// `paid && now < expires_at` for any of the user's subscriptions.
    pub fn has_access(&self, user_id: &str) -> BookingResult<bool> {
        self.has_access_at(user_id, Utc::now())
    }

    pub fn has_access_at(&self, user_id: &str, now: DateTime<Utc>) -> BookingResult<bool> {
        Ok(self.store.active_subscription(user_id, now)?.is_some())
    }

    pub async fn subscribe(
        &self,
        user_id: &str,
        buyer: &Buyer,
        plan: PlanType,
    ) -> BookingResult<SubscriptionCheckout> {
        buyer.validate()?;
        if user_id.trim().is_empty() {
            return Err(BookingError::Validation("user id is required".into()));
        }
        let request = SubscriptionRequest {
            user_id,
            full_name: buyer.name.trim(),
            email: buyer.email.trim(),
            plan,
            amount_cents: self.pricing.price(plan),
            currency: &self.settings.currency,
        };
        let prefix = self.settings.reference_prefix.clone();
        let pending = self
            .store
            .create_pending_subscription(&request, |id| transaction_reference(&prefix, "sub", id))?;

        let (first_name, last_name) = InitializeRequest::split_name(&buyer.name);
        let init = InitializeRequest {
            amount_cents: pending.transaction.amount_cents,
            currency: pending.transaction.currency.clone(),
            email: pending.subscription.email.clone(),
            first_name,
            last_name,
            tx_ref: pending.transaction.tx_ref.clone(),
            callback_url: self.settings.callback_url.clone(),
            return_url: self.settings.return_url.clone(),
        };
        match self.gateway.initialize(&init).await {
            Ok(checkout) => Ok(SubscriptionCheckout {
                subscription: pending.subscription,
                transaction: pending.transaction,
                checkout_url: checkout.checkout_url,
            }),
            Err(err) => {
                warn!(
                    tx_ref = %pending.transaction.tx_ref,
                    error = %err,
                    "subscription checkout failed; discarding pending subscription"
                );
                if let Err(delete_err) = self
                    .store
                    .delete_pending_subscription(pending.subscription.id)
                {
                    warn!(error = %delete_err, "failed to discard pending subscription");
                }
                Err(BookingError::PaymentInitFailed(err))
            }
        }
    }

    /// Same contract as reservation verification; expiry is counted from
    /// the moment the payment is confirmed.
    pub async fn verify_subscription(&self, tx_ref: &str) -> BookingResult<SubscriptionVerification> {
        let transaction = self
            .store
            .fetch_transaction(tx_ref)?
            .filter(|tx| tx.kind == TransactionKind::Subscription)
            .ok_or_else(|| BookingError::TransactionNotFound(tx_ref.to_string()))?;
        let subscription_id = transaction
            .subscription_id
            .ok_or_else(|| BookingError::TransactionNotFound(tx_ref.to_string()))?;

        match transaction.status {
            TransactionStatus::Success => {
                self.deliver_confirmation(subscription_id).await;
                return self.result(tx_ref, subscription_id, TransactionStatus::Success);
            }
            TransactionStatus::Failed => {
                return Err(BookingError::VerificationFailed {
                    tx_ref: tx_ref.to_string(),
                    reason: "payment failed".into(),
                })
            }
            TransactionStatus::Pending => {}
        }

        let verdict = match self.gateway.verify(tx_ref).await {
            Ok(verdict) => verdict,
            Err(GatewayError::Timeout(_)) => {
                return Err(BookingError::GatewayTimeout(tx_ref.to_string()))
            }
            Err(err) => {
                return Err(BookingError::VerificationFailed {
                    tx_ref: tx_ref.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        match verdict {
            GatewayVerdict::Success => {
                let status = self.store.confirm_subscription_payment(tx_ref, Utc::now())?;
                if status != TransactionStatus::Success {
                    return Err(BookingError::VerificationFailed {
                        tx_ref: tx_ref.to_string(),
                        reason: format!("transaction already {status}"),
                    });
                }
                info!(tx_ref, subscription_id, "subscription activated");
                self.deliver_confirmation(subscription_id).await;
                self.result(tx_ref, subscription_id, status)
            }
            GatewayVerdict::Failed => {
                self.store.fail_transaction(tx_ref)?;
                Err(BookingError::VerificationFailed {
                    tx_ref: tx_ref.to_string(),
                    reason: "gateway reported payment failure".into(),
                })
            }
            GatewayVerdict::Pending => Err(BookingError::VerificationFailed {
                tx_ref: tx_ref.to_string(),
                reason: "payment not completed yet".into(),
            }),
        }
    }

    fn result(
        &self,
        tx_ref: &str,
        subscription_id: i64,
        status: TransactionStatus,
    ) -> BookingResult<SubscriptionVerification> {
        let subscription = self
            .store
            .fetch_subscription(subscription_id)?
            .ok_or_else(|| BookingError::TransactionNotFound(tx_ref.to_string()))?;
        Ok(SubscriptionVerification {
            tx_ref: tx_ref.to_string(),
            subscription_id,
            status,
            plan: subscription.plan,
            expires_at: subscription.expires_at,
        })
    }

    async fn deliver_confirmation(&self, subscription_id: i64) {
        match self.store.claim_subscription_email(subscription_id) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(subscription_id, error = %err, "could not claim subscription mail");
                return;
            }
        }
        if let Err(reason) = self.send_confirmation(subscription_id).await {
            warn!(subscription_id, error = %reason, "subscription confirmation failed");
            if let Err(err) = self.store.release_subscription_email(subscription_id) {
                warn!(subscription_id, error = %err, "could not release subscription claim");
            }
        }
    }

    async fn send_confirmation(&self, subscription_id: i64) -> Result<(), String> {
        let subscription = self
            .store
            .fetch_subscription(subscription_id)
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("subscription {subscription_id} vanished"))?;
        let artifact = self
            .qr
            .subscription(&subscription)
            .map_err(|err| err.to_string())?;
        self.store
            .set_subscription_qr(subscription_id, &artifact.path.to_string_lossy())
            .map_err(|err| err.to_string())?;
        self.mailer
            .send(subscription_confirmation(&subscription, &artifact))
            .await
            .map_err(|err| err.to_string())
    }
}
