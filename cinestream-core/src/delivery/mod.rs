mod signing;

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::media::{EncryptionKey, MediaError};
use crate::store::{SqliteStore, StoreError};

pub use signing::{SignedUrl, SigningError, SigningResult, UrlSigner};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("user {0} has no active subscription")]
    NoAccess(String),
    #[error("content {0} not found")]
    ContentNotFound(i64),
    #[error("content {0} has not been transcoded yet")]
    NotReady(i64),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NoAccess(_) => ErrorKind::AuthorizationFailure,
            DeliveryError::ContentNotFound(_) | DeliveryError::NotReady(_) => ErrorKind::NotFound,
            DeliveryError::Signing(err) => err.kind(),
            DeliveryError::Store(err) => err.kind(),
            DeliveryError::Media(MediaError::Io { .. }) => ErrorKind::NotFound,
            DeliveryError::Media(err) => err.kind(),
        }
    }
}

pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackGrant {
    pub content_id: i64,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Subscription-gated playback: signed manifest URLs and encryption keys.
#[derive(Debug, Clone)]
pub struct PlaybackService {
    store: SqliteStore,
    signer: UrlSigner,
    media_base_url: String,
    key_store: PathBuf,
}

impl PlaybackService {
    pub fn new(
        store: SqliteStore,
        signer: UrlSigner,
        media_base_url: impl Into<String>,
        key_store: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            signer,
            media_base_url: media_base_url.into(),
            key_store: key_store.into(),
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    pub fn has_access(&self, user_id: &str) -> DeliveryResult<bool> {
        Ok(self.store.active_subscription(user_id, Utc::now())?.is_some())
    }

    fn require_access(&self, user_id: &str) -> DeliveryResult<()> {
        if user_id.trim().is_empty() || !self.has_access(user_id)? {
            return Err(DeliveryError::NoAccess(user_id.to_string()));
        }
        Ok(())
    }

    pub fn playback_url(&self, user_id: &str, content_id: i64) -> DeliveryResult<PlaybackGrant> {
        self.require_access(user_id)?;
        let content = self
            .store
            .fetch_content(content_id)?
            .ok_or(DeliveryError::ContentNotFound(content_id))?;
        let location = content
            .output_location
            .ok_or(DeliveryError::NotReady(content_id))?;
        let base = format!(
            "{}/{}",
            self.media_base_url.trim_end_matches('/'),
            location.trim_start_matches('/')
        );
        let signed = self.signer.sign(&content_id.to_string(), &base)?;
        debug!(user_id, content_id, "issued playback url");
        Ok(PlaybackGrant {
            content_id,
            url: signed.url,
            expires_at: signed
                .expires
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
    }

    /// Fails closed: any expiry or signature problem is an error.
    pub fn authorize(&self, asset_id: &str, expires: i64, signature: &str) -> DeliveryResult<()> {
        self.signer.check(asset_id, expires, signature)?;
        Ok(())
    }

    pub async fn encryption_key(&self, user_id: &str, content_id: i64) -> DeliveryResult<Vec<u8>> {
        self.require_access(user_id)?;
        if self.store.fetch_content(content_id)?.is_none() {
            return Err(DeliveryError::ContentNotFound(content_id));
        }
        Ok(EncryptionKey::load(&self.key_store, content_id).await?)
    }
}
