mod error;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CinestreamConfig;
use crate::mail::{reservation_confirmation, Mailer};
use crate::payment::{GatewayError, GatewayVerdict, InitializeRequest, PaymentGateway};
use crate::store::{
    HoldRequest, Reservation, SqliteStore, StoreError, Transaction, TransactionKind,
    TransactionStatus,
};
use crate::ticket::QrRenderer;

pub use error::{BookingError, BookingResult};

/// Everything the checkout flows need from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub callback_url: String,
    pub return_url: String,
    pub reference_prefix: String,
    pub public_base_url: String,
}

impl CheckoutSettings {
    pub fn from_config(config: &CinestreamConfig) -> Self {
        Self {
            currency: config.gateway.currency.clone(),
            callback_url: config.callback_url(),
            return_url: config.return_url(),
            reference_prefix: config.booking.reference_prefix.clone(),
            public_base_url: config.system.public_base_url.clone(),
        }
    }

    pub fn ticket_url(&self, reservation_id: i64) -> String {
        format!(
            "{}/ticket/{reservation_id}",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

/// Builds a gateway reference such as `cine-3-17-9f2c4e1a0b7d`. The random
/// tail keeps references unique even if ids are ever reused.
pub fn transaction_reference(prefix: &str, scope: &str, id: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{scope}-{id}-{}", &suffix[..12])
}

#[derive(Debug, Clone)]
pub struct Buyer {
    pub name: String,
    pub email: String,
}

impl Buyer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn validate(&self) -> BookingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BookingError::Validation("buyer name is required".into()));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(BookingError::Validation(format!(
                "invalid email address: {}",
                self.email
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationCheckout {
    pub reservation: Reservation,
    pub transaction: Transaction,
    pub checkout_url: String,
}

/// Outcome of a verification. Repeated calls for a settled transaction
/// produce the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub tx_ref: String,
    pub reservation_id: i64,
    pub status: TransactionStatus,
    pub paid: bool,
    pub ticket_url: String,
}

#[derive(Clone)]
pub struct BookingService {
    store: SqliteStore,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    qr: QrRenderer,
    settings: CheckoutSettings,
}

impl BookingService {
    pub fn new(
        store: SqliteStore,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        qr: QrRenderer,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            mailer,
            qr,
            settings,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Locks the seat, records the pending reservation and opens a gateway
    /// checkout. A failed checkout rolls the local writes back.
    pub async fn reserve_seat(
        &self,
        movie_id: i64,
        seat_id: i64,
        buyer: &Buyer,
    ) -> BookingResult<ReservationCheckout> {
        buyer.validate()?;
        let movie = self
            .store
            .fetch_movie(movie_id)?
            .ok_or(BookingError::SeatNotFound { movie_id, seat_id })?;

        let request = HoldRequest {
            movie_id,
            seat_id,
            user_name: buyer.name.trim(),
            email: buyer.email.trim(),
            amount_cents: movie.ticket_price_cents,
            currency: &self.settings.currency,
        };
        let prefix = self.settings.reference_prefix.clone();
        let hold = self
            .store
            .hold_seat(&request, |reservation_id| {
                transaction_reference(&prefix, &movie_id.to_string(), reservation_id)
            })
            .map_err(|err| match err {
                StoreError::NotFound { .. } => BookingError::SeatNotFound { movie_id, seat_id },
                StoreError::Conflict(_) => BookingError::SeatAlreadyBooked(format!(
                    "{seat_id} (movie {movie_id})"
                )),
                other => BookingError::Store(other),
            })?;

        let (first_name, last_name) = InitializeRequest::split_name(&buyer.name);
        let init = InitializeRequest {
            amount_cents: hold.transaction.amount_cents,
            currency: hold.transaction.currency.clone(),
            email: hold.reservation.email.clone(),
            first_name,
            last_name,
            tx_ref: hold.transaction.tx_ref.clone(),
            callback_url: self.settings.callback_url.clone(),
            return_url: self.settings.return_url.clone(),
        };

        match self.gateway.initialize(&init).await {
            Ok(checkout) => {
                info!(
                    tx_ref = %hold.transaction.tx_ref,
                    movie_id,
                    seat = %hold.seat.label,
                    "seat held pending payment"
                );
                Ok(ReservationCheckout {
                    reservation: hold.reservation,
                    transaction: hold.transaction,
                    checkout_url: checkout.checkout_url,
                })
            }
            Err(err) => {
                warn!(
                    tx_ref = %hold.transaction.tx_ref,
                    error = %err,
                    "checkout initialization failed; releasing seat"
                );
                if let Err(release_err) = self.store.release_hold(hold.reservation.id) {
                    warn!(
                        reservation_id = hold.reservation.id,
                        error = %release_err,
                        "failed to release seat after checkout failure"
                    );
                }
                Err(BookingError::PaymentInitFailed(err))
            }
        }
    }

    /// Confirms a reservation payment. Safe to call any number of times:
    /// settled transactions are answered from local state and never reach
    /// the gateway again.
    pub async fn verify_payment(&self, tx_ref: &str) -> BookingResult<VerificationResult> {
        let transaction = self
            .store
            .fetch_transaction(tx_ref)?
            .filter(|tx| tx.kind == TransactionKind::Reservation)
            .ok_or_else(|| BookingError::TransactionNotFound(tx_ref.to_string()))?;
        let reservation_id = transaction
            .reservation_id
            .ok_or_else(|| BookingError::TransactionNotFound(tx_ref.to_string()))?;

        match transaction.status {
            TransactionStatus::Success => {
                self.deliver_confirmation(reservation_id).await;
                return Ok(self.result(&transaction, reservation_id, TransactionStatus::Success));
            }
            TransactionStatus::Failed => {
                return Err(BookingError::VerificationFailed {
                    tx_ref: tx_ref.to_string(),
                    reason: "payment failed".into(),
                });
            }
            TransactionStatus::Pending => {}
        }

        let verdict = match self.gateway.verify(tx_ref).await {
            Ok(verdict) => verdict,
            Err(GatewayError::Timeout(_)) => {
                warn!(tx_ref, "gateway verification timed out");
                return Err(BookingError::GatewayTimeout(tx_ref.to_string()));
            }
            Err(err) => {
                warn!(tx_ref, error = %err, "gateway verification errored");
                return Err(BookingError::VerificationFailed {
                    tx_ref: tx_ref.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        match verdict {
            GatewayVerdict::Success => {
                let status = self.store.confirm_reservation_payment(tx_ref)?;
                if status != TransactionStatus::Success {
                    return Err(BookingError::VerificationFailed {
                        tx_ref: tx_ref.to_string(),
                        reason: format!("transaction already {status}"),
                    });
                }
                info!(tx_ref, reservation_id, "reservation paid");
                self.deliver_confirmation(reservation_id).await;
                Ok(self.result(&transaction, reservation_id, status))
            }
            GatewayVerdict::Failed => {
                let status = self.store.fail_transaction(tx_ref)?;
                info!(tx_ref, %status, "gateway reported payment failure");
                if status == TransactionStatus::Success {
                    self.deliver_confirmation(reservation_id).await;
                    return Ok(self.result(&transaction, reservation_id, status));
                }
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
        transaction: &Transaction,
        reservation_id: i64,
        status: TransactionStatus,
    ) -> VerificationResult {
        VerificationResult {
            tx_ref: transaction.tx_ref.clone(),
            reservation_id,
            status,
            paid: status == TransactionStatus::Success,
            ticket_url: self.settings.ticket_url(reservation_id),
        }
    }

    /// Renders the ticket QR and sends the confirmation at most once. The
    /// `email_sent` claim is released again when delivery fails so a later
    /// verification can retry; failures never undo the payment.
    async fn deliver_confirmation(&self, reservation_id: i64) {
        match self.store.claim_reservation_email(reservation_id) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(reservation_id, error = %err, "could not claim confirmation mail");
                return;
            }
        }
        if let Err(reason) = self.send_confirmation(reservation_id).await {
            warn!(reservation_id, error = %reason, "confirmation delivery failed");
            if let Err(err) = self.store.release_reservation_email(reservation_id) {
                warn!(reservation_id, error = %err, "could not release confirmation claim");
            }
        }
    }

    async fn send_confirmation(&self, reservation_id: i64) -> Result<(), String> {
        let details = self
            .store
            .fetch_ticket_details(reservation_id)
            .map_err(|err| err.to_string())?;
        let artifact = self.qr.reservation(&details).map_err(|err| err.to_string())?;
        self.store
            .set_reservation_qr(reservation_id, &artifact.path.to_string_lossy())
            .map_err(|err| err.to_string())?;
        let message = reservation_confirmation(
            &details,
            &self.settings.ticket_url(reservation_id),
            &artifact,
        );
        self.mailer
            .send(message)
            .await
            .map_err(|err| err.to_string())?;
        info!(reservation_id, to = %details.reservation.email, "ticket confirmation sent");
        Ok(())
    }
}
