use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::error::is_unique_violation;
use super::models::{Reservation, Seat, Transaction, TransactionKind, TransactionStatus};
use super::{SqliteStore, StoreError, StoreResult};

/// A freshly locked seat together with the pending reservation and
/// transaction created for it.
#[derive(Debug, Clone, Serialize)]
pub struct SeatHold {
    pub seat: Seat,
    pub reservation: Reservation,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketDetails {
    pub reservation: Reservation,
    pub movie_title: String,
    pub show_time: DateTime<Utc>,
    pub seat_label: String,
}

#[derive(Debug, Clone)]
pub struct HoldRequest<'a> {
    pub movie_id: i64,
    pub seat_id: i64,
    pub user_name: &'a str,
    pub email: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
}

impl SqliteStore {
    /// Locks the seat, flips it to booked and creates the pending
    /// reservation/transaction pair. `reference` receives the new
    /// reservation id and returns the transaction reference.
    pub fn hold_seat<F>(&self, request: &HoldRequest<'_>, reference: F) -> StoreResult<SeatHold>
    where
        F: FnOnce(i64) -> String,
    {
        if request.amount_cents <= 0 {
            return Err(StoreError::Validation(format!(
                "amount must be positive, got {}",
                request.amount_cents
            )));
        }
        let result = self.write_transaction(|tx| {
            let seat = tx
                .query_row(
                    "SELECT * FROM seats WHERE id = ?1 AND movie_id = ?2",
                    params![request.seat_id, request.movie_id],
                    |row| Seat::from_row(row),
                )
                .optional()?
                .ok_or_else(|| {
                    StoreError::not_found(
                        "seat",
                        format!("{}/{}", request.movie_id, request.seat_id),
                    )
                })?;
            if seat.is_booked {
                return Err(StoreError::Conflict(format!(
                    "seat {} is already booked",
                    seat.label
                )));
            }
            let flipped = tx.execute(
                "UPDATE seats SET is_booked = 1 WHERE id = ?1 AND is_booked = 0",
                [seat.id],
            )?;
            if flipped != 1 {
                return Err(StoreError::Conflict(format!(
                    "seat {} is already booked",
                    seat.label
                )));
            }

            tx.execute(
                "INSERT INTO reservations (user_name, email, movie_id, seat_id, paid, email_sent)
                 VALUES (?1, ?2, ?3, ?4, 0, 0)",
                params![request.user_name, request.email, request.movie_id, seat.id],
            )?;
            let reservation_id = tx.last_insert_rowid();
            let tx_ref = reference(reservation_id);
            tx.execute(
                "INSERT INTO transactions (tx_ref, kind, reservation_id, amount_cents, currency, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
                params![
                    &tx_ref,
                    TransactionKind::Reservation.as_str(),
                    reservation_id,
                    request.amount_cents,
                    request.currency
                ],
            )?;

            let reservation = tx.query_row(
                "SELECT * FROM reservations WHERE id = ?1",
                [reservation_id],
                |row| Reservation::from_row(row),
            )?;
            let transaction = tx.query_row(
                "SELECT * FROM transactions WHERE tx_ref = ?1",
                [&tx_ref],
                |row| Transaction::from_row(row),
            )?;
            Ok(SeatHold {
                seat: Seat {
                    is_booked: true,
                    ..seat
                },
                reservation,
                transaction,
            })
        });

        match result {
            Err(StoreError::Database(err)) if is_unique_violation(&err) => Err(
                StoreError::Conflict("seat already held by another reservation".into()),
            ),
            other => other,
        }
    }

    /// Compensating rollback for a hold whose payment never started: frees
    /// the seat and deletes the reservation and its transaction.
    pub fn release_hold(&self, reservation_id: i64) -> StoreResult<()> {
        self.write_transaction(|tx| {
            let seat_id: Option<i64> = tx
                .query_row(
                    "SELECT seat_id FROM reservations WHERE id = ?1",
                    [reservation_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(seat_id) = seat_id else {
                return Err(StoreError::not_found("reservation", reservation_id));
            };
            tx.execute(
                "DELETE FROM transactions WHERE reservation_id = ?1",
                [reservation_id],
            )?;
            tx.execute("DELETE FROM reservations WHERE id = ?1", [reservation_id])?;
            tx.execute("UPDATE seats SET is_booked = 0 WHERE id = ?1", [seat_id])?;
            Ok(())
        })
    }

    pub fn fetch_transaction(&self, tx_ref: &str) -> StoreResult<Option<Transaction>> {
        let conn = self.open()?;
        let transaction = conn
            .query_row(
                "SELECT * FROM transactions WHERE tx_ref = ?1",
                [tx_ref],
                |row| Transaction::from_row(row),
            )
            .optional()?;
        Ok(transaction)
    }

    pub fn fetch_reservation(&self, reservation_id: i64) -> StoreResult<Option<Reservation>> {
        let conn = self.open()?;
        let reservation = conn
            .query_row(
                "SELECT * FROM reservations WHERE id = ?1",
                [reservation_id],
                |row| Reservation::from_row(row),
            )
            .optional()?;
        Ok(reservation)
    }

    pub fn list_reservations(&self, movie_id: i64) -> StoreResult<Vec<Reservation>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM reservations WHERE movie_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([movie_id], |row| Reservation::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn fetch_ticket_details(&self, reservation_id: i64) -> StoreResult<TicketDetails> {
        let conn = self.open()?;
        let details = conn
            .query_row(
                "SELECT r.*, m.title AS movie_title, m.show_time AS movie_show_time, s.label AS seat_label
                 FROM reservations r
                 JOIN movies m ON m.id = r.movie_id
                 JOIN seats s ON s.id = r.seat_id
                 WHERE r.id = ?1",
                [reservation_id],
                |row| {
                    let show_time: NaiveDateTime = row.get("movie_show_time")?;
                    Ok(TicketDetails {
                        reservation: Reservation::from_row(row)?,
                        movie_title: row.get("movie_title")?,
                        show_time: Utc.from_utc_datetime(&show_time),
                        seat_label: row.get("seat_label")?,
                    })
                },
            )
            .optional()?;
        details.ok_or_else(|| StoreError::not_found("reservation", reservation_id))
    }

    /// Marks a pending reservation transaction as successful and the
    /// reservation as paid, atomically. Terminal transactions are left as
    /// they are; the stored status is returned either way.
    pub fn confirm_reservation_payment(&self, tx_ref: &str) -> StoreResult<TransactionStatus> {
        self.write_transaction(|tx| {
            let transaction = load_transaction(tx, tx_ref)?;
            let status = settle(tx, &transaction, TransactionStatus::Success)?;
            if status == TransactionStatus::Success {
                if let Some(reservation_id) = transaction.reservation_id {
                    tx.execute(
                        "UPDATE reservations SET paid = 1 WHERE id = ?1",
                        [reservation_id],
                    )?;
                }
            }
            Ok(status)
        })
    }

    /// Moves a pending transaction to `failed`. The reservation stays
    /// unpaid and its seat stays booked.
    pub fn fail_transaction(&self, tx_ref: &str) -> StoreResult<TransactionStatus> {
        self.write_transaction(|tx| {
            let transaction = load_transaction(tx, tx_ref)?;
            settle(tx, &transaction, TransactionStatus::Failed)
        })
    }

    /// Claims the right to send the confirmation mail. Only one caller ever
    /// observes `true` until [`SqliteStore::release_reservation_email`] is
    /// called after a failed delivery.
    pub fn claim_reservation_email(&self, reservation_id: i64) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE reservations SET email_sent = 1 WHERE id = ?1 AND email_sent = 0 AND paid = 1",
            [reservation_id],
        )?;
        Ok(affected == 1)
    }

    pub fn release_reservation_email(&self, reservation_id: i64) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE reservations SET email_sent = 0 WHERE id = ?1",
            [reservation_id],
        )?;
        Ok(())
    }

    pub fn set_reservation_qr(&self, reservation_id: i64, path: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE reservations SET qr_code_path = ?1 WHERE id = ?2",
            params![path, reservation_id],
        )?;
        Ok(())
    }
}

pub(super) fn load_transaction(
    tx: &rusqlite::Transaction<'_>,
    tx_ref: &str,
) -> StoreResult<Transaction> {
    tx.query_row(
        "SELECT * FROM transactions WHERE tx_ref = ?1",
        [tx_ref],
        |row| Transaction::from_row(row),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("transaction", tx_ref))
}

/// Applies `target` only when the transaction is still pending, which keeps
/// status transitions monotonic: pending -> success | failed, never back.
pub(super) fn settle(
    tx: &rusqlite::Transaction<'_>,
    transaction: &Transaction,
    target: TransactionStatus,
) -> StoreResult<TransactionStatus> {
    if transaction.status.terminal() {
        return Ok(transaction.status);
    }
    tx.execute(
        "UPDATE transactions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
        params![target.as_str(), Utc::now().naive_utc(), transaction.id],
    )?;
    Ok(target)
}
