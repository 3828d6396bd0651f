use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::booking::{load_transaction, settle};
use super::models::{PlanType, Subscription, Transaction, TransactionKind, TransactionStatus};
use super::{SqliteStore, StoreError, StoreResult};

#[derive(Debug, Clone, Serialize)]
pub struct PendingSubscription {
    pub subscription: Subscription,
    pub transaction: Transaction,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRequest<'a> {
    pub user_id: &'a str,
    pub full_name: &'a str,
    pub email: &'a str,
    pub plan: PlanType,
    pub amount_cents: i64,
    pub currency: &'a str,
}

impl SqliteStore {
    pub fn create_pending_subscription<F>(
        &self,
        request: &SubscriptionRequest<'_>,
        reference: F,
    ) -> StoreResult<PendingSubscription>
    where
        F: FnOnce(i64) -> String,
    {
        if request.amount_cents <= 0 {
            return Err(StoreError::Validation(format!(
                "amount must be positive, got {}",
                request.amount_cents
            )));
        }
        self.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO subscriptions (user_id, full_name, email, plan, paid, email_sent)
                 VALUES (?1, ?2, ?3, ?4, 0, 0)",
                params![
                    request.user_id,
                    request.full_name,
                    request.email,
                    request.plan.as_str()
                ],
            )?;
            let subscription_id = tx.last_insert_rowid();
            let tx_ref = reference(subscription_id);
            tx.execute(
                "INSERT INTO transactions (tx_ref, kind, subscription_id, amount_cents, currency, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
                params![
                    &tx_ref,
                    TransactionKind::Subscription.as_str(),
                    subscription_id,
                    request.amount_cents,
                    request.currency
                ],
            )?;
            let subscription = tx.query_row(
                "SELECT * FROM subscriptions WHERE id = ?1",
                [subscription_id],
                |row| Subscription::from_row(row),
            )?;
            let transaction = load_transaction(tx, &tx_ref)?;
            Ok(PendingSubscription {
                subscription,
                transaction,
            })
        })
    }

    /// Compensating delete for a subscription whose checkout never started.
    pub fn delete_pending_subscription(&self, subscription_id: i64) -> StoreResult<()> {
        self.write_transaction(|tx| {
            tx.execute(
                "DELETE FROM transactions WHERE subscription_id = ?1 AND status = 'pending'",
                [subscription_id],
            )?;
            tx.execute(
                "DELETE FROM subscriptions WHERE id = ?1 AND paid = 0",
                [subscription_id],
            )?;
            Ok(())
        })
    }

    pub fn fetch_subscription(&self, subscription_id: i64) -> StoreResult<Option<Subscription>> {
        let conn = self.open()?;
        let subscription = conn
            .query_row(
                "SELECT * FROM subscriptions WHERE id = ?1",
                [subscription_id],
                |row| Subscription::from_row(row),
            )
            .optional()?;
        Ok(subscription)
    }

    /// Settles the transaction and activates the subscription with an expiry
    /// counted from `activated_at`, the moment payment was confirmed.
    pub fn confirm_subscription_payment(
        &self,
        tx_ref: &str,
        activated_at: DateTime<Utc>,
    ) -> StoreResult<TransactionStatus> {
        self.write_transaction(|tx| {
            let transaction = load_transaction(tx, tx_ref)?;
            let was_pending = !transaction.status.terminal();
            let status = settle(tx, &transaction, TransactionStatus::Success)?;
            if was_pending && status == TransactionStatus::Success {
                let subscription_id = transaction
                    .subscription_id
                    .ok_or_else(|| StoreError::not_found("subscription", tx_ref))?;
                let plan: String = tx.query_row(
                    "SELECT plan FROM subscriptions WHERE id = ?1",
                    [subscription_id],
                    |row| row.get(0),
                )?;
                let plan: PlanType = plan.parse().map_err(StoreError::Validation)?;
                let expires_at = activated_at + plan.access_period();
                tx.execute(
                    "UPDATE subscriptions SET paid = 1, expires_at = ?1 WHERE id = ?2",
                    params![expires_at.naive_utc(), subscription_id],
                )?;
            }
            Ok(status)
        })
    }

    pub fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        let conn = self.open()?;
        let subscription = conn
            .query_row(
                "SELECT * FROM subscriptions
                 WHERE user_id = ?1 AND paid = 1 AND expires_at IS NOT NULL AND expires_at > ?2
                 ORDER BY expires_at DESC LIMIT 1",
                params![user_id, now.naive_utc()],
                |row| Subscription::from_row(row),
            )
            .optional()?;
        Ok(subscription)
    }

    pub fn claim_subscription_email(&self, subscription_id: i64) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE subscriptions SET email_sent = 1 WHERE id = ?1 AND email_sent = 0 AND paid = 1",
            [subscription_id],
        )?;
        Ok(affected == 1)
    }

    pub fn release_subscription_email(&self, subscription_id: i64) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE subscriptions SET email_sent = 0 WHERE id = ?1",
            [subscription_id],
        )?;
        Ok(())
    }

    pub fn set_subscription_qr(&self, subscription_id: i64, path: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE subscriptions SET qr_code_path = ?1 WHERE id = ?2",
            params![path, subscription_id],
        )?;
        Ok(())
    }
}
