use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use cinestream_core::mail::{EmailMessage, MailResult, Mailer};
use cinestream_core::payment::{
    Checkout, GatewayError, GatewayResult, GatewayVerdict, InitializeRequest, PaymentGateway,
};
use cinestream_core::store::{PlanType, SqliteStore, TransactionStatus};
use cinestream_core::{
    BookingError, Buyer, CheckoutSettings, PlanPricing, QrRenderer, SubscriptionService,
};

struct ScriptedGateway {
    accept_init: bool,
    verify_calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initialize(&self, request: &InitializeRequest) -> GatewayResult<Checkout> {
        if !self.accept_init {
            return Err(GatewayError::Malformed("missing checkout data".into()));
        }
        Ok(Checkout {
            checkout_url: format!("https://checkout.example.com/{}", request.tx_ref),
        })
    }

    async fn verify(&self, _tx_ref: &str) -> GatewayResult<GatewayVerdict> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayVerdict::Success)
    }
}

#[derive(Default)]
struct CountingMailer {
    sent: AtomicUsize,
}

#[async_trait]
impl Mailer for CountingMailer {
    async fn send(&self, message: EmailMessage) -> MailResult<()> {
        assert_eq!(message.subject, "Your Subscription Confirmation");
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn build(dir: &TempDir, accept_init: bool) -> (SubscriptionService, SqliteStore, Arc<ScriptedGateway>, Arc<CountingMailer>) {
    let store = SqliteStore::builder()
        .path(dir.path().join("cinema.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    let gateway = Arc::new(ScriptedGateway {
        accept_init,
        verify_calls: AtomicUsize::new(0),
    });
    let mailer = Arc::new(CountingMailer::default());
    let service = SubscriptionService::new(
        store.clone(),
        gateway.clone(),
        mailer.clone(),
        QrRenderer::new(dir.path().join("qr")),
        CheckoutSettings {
            currency: "ETB".into(),
            callback_url: "https://cinema.example.com/payment/callback".into(),
            return_url: "https://cinema.example.com/payment/verify".into(),
            reference_prefix: "cine".into(),
            public_base_url: "https://cinema.example.com".into(),
        },
        PlanPricing {
            monthly_price_cents: 19_900,
            annual_price_cents: 199_900,
        },
    );
    (service, store, gateway, mailer)
}

#[tokio::test]
async fn access_starts_only_after_confirmed_payment() {
    let dir = TempDir::new().unwrap();
    let (service, store, gateway, mailer) = build(&dir, true);
    let buyer = Buyer::new("Alice Smith", "alice@example.com");

    let checkout = service.subscribe("user-1", &buyer, PlanType::Monthly).await.unwrap();
    assert_eq!(checkout.transaction.amount_cents, 19_900);
    assert_eq!(checkout.transaction.status, TransactionStatus::Pending);
    assert!(!service.has_access("user-1").unwrap());

    let before = Utc::now();
    let verified = service
        .verify_subscription(&checkout.transaction.tx_ref)
        .await
        .unwrap();
    let after = Utc::now();
    assert_eq!(verified.status, TransactionStatus::Success);
    assert_eq!(verified.plan, PlanType::Monthly);
    let expires = verified.expires_at.expect("expiry set on payment");
    assert!(expires >= before + Duration::days(30) - Duration::seconds(1));
    assert!(expires <= after + Duration::days(30) + Duration::seconds(1));

    assert!(service.has_access("user-1").unwrap());
    assert!(!service.has_access("user-2").unwrap());
    assert!(!service
        .has_access_at("user-1", expires)
        .unwrap(), "access ends exactly at expiry");

    let again = service
        .verify_subscription(&checkout.transaction.tx_ref)
        .await
        .unwrap();
    assert_eq!(again, verified);
    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mailer.sent.load(Ordering::SeqCst), 1);

    let subscription = store
        .fetch_subscription(verified.subscription_id)
        .unwrap()
        .unwrap();
    assert!(subscription.paid);
    assert!(subscription.qr_code_path.is_some());
}

#[tokio::test]
async fn annual_plan_runs_for_a_year() {
    let dir = TempDir::new().unwrap();
    let (service, _, _, _) = build(&dir, true);
    let checkout = service
        .subscribe("user-9", &Buyer::new("Bob", "bob@example.com"), PlanType::Annual)
        .await
        .unwrap();
    assert_eq!(checkout.transaction.amount_cents, 199_900);
    let verified = service
        .verify_subscription(&checkout.transaction.tx_ref)
        .await
        .unwrap();
    let remaining = verified.expires_at.unwrap() - Utc::now();
    assert!(remaining > Duration::days(364));
    assert!(remaining <= Duration::days(365));
}

#[tokio::test]
async fn failed_checkout_discards_the_pending_subscription() {
    let dir = TempDir::new().unwrap();
    let (service, store, _, _) = build(&dir, false);
    let err = service
        .subscribe("user-1", &Buyer::new("Alice", "alice@example.com"), PlanType::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PaymentInitFailed(_)));
    assert!(store.active_subscription("user-1", Utc::now()).unwrap().is_none());
    assert!(store.fetch_subscription(1).unwrap().is_none());
}

#[tokio::test]
async fn reservation_references_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (service, _, gateway, _) = build(&dir, true);
    let err = service.verify_subscription("cine-1-1-abcdef").await.unwrap_err();
    assert!(matches!(err, BookingError::TransactionNotFound(_)));
    assert_eq!(gateway.verify_calls.load(Ordering::SeqCst), 0);
}
