use thiserror::Error;

use crate::error::ErrorKind;
use crate::payment::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("seat {seat_id} not found for movie {movie_id}")]
    SeatNotFound { movie_id: i64, seat_id: i64 },
    #[error("seat {0} is already booked")]
    SeatAlreadyBooked(String),
    #[error("payment initialization failed: {0}")]
    PaymentInitFailed(#[source] GatewayError),
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    #[error("verification failed for {tx_ref}: {reason}")]
    VerificationFailed { tx_ref: String, reason: String },
    #[error("payment gateway timed out while verifying {0}; retry later")]
    GatewayTimeout(String),
    #[error("invalid booking request: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::SeatNotFound { .. } | BookingError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            BookingError::SeatAlreadyBooked(_) => ErrorKind::Conflict,
            BookingError::PaymentInitFailed(_)
            | BookingError::VerificationFailed { .. }
            | BookingError::GatewayTimeout(_) => ErrorKind::ExternalServiceFailure,
            BookingError::Validation(_) => ErrorKind::ValidationFailure,
            BookingError::Store(err) => err.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::GatewayTimeout(_))
    }
}

pub type BookingResult<T> = std::result::Result<T, BookingError>;
