mod analytics;
mod booking;
mod catalog;
pub mod error;
mod jobs;
pub mod models;
mod subscriptions;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, TransactionBehavior};

use crate::sqlite::configure_connection;

pub use analytics::{
    completion_rate, ContentAnalyticsRow, ProgressApplication, ProgressDelta, ProgressUpdate,
    RegionShare, SiteTotals,
};
pub(crate) use analytics::round2;
pub use booking::{HoldRequest, SeatHold, TicketDetails};
pub use subscriptions::{PendingSubscription, SubscriptionRequest};
pub use error::{StoreError, StoreResult};
pub use jobs::{JobFilter, JobStatus, TranscodeJob};
pub use models::{
    Category, Content, Language, Movie, NewContent, NewMovie, PlanType, Reservation, Seat,
    Subscription, Transaction, TransactionKind, TransactionStatus, WatchLog,
};

const CINEMA_SCHEMA: &str = include_str!("../../../sql/cinema.sql");

#[derive(Debug, Clone)]
pub struct SqliteStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteStore { path, flags })
    }
}

/// Handle on the cinema database. Cheap to clone; every operation opens its
/// own connection so concurrent callers never share a transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteStore {
    pub fn builder() -> SqliteStoreBuilder {
        SqliteStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn open(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CINEMA_SCHEMA)?;
        Ok(())
    }

    /// Runs `operation` inside a `BEGIN IMMEDIATE` transaction. The database
    /// write lock is taken before the first read, so a concurrent writer
    /// blocks (up to the busy timeout) instead of observing stale rows.
    pub(crate) fn write_transaction<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = operation(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
