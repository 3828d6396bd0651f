use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use url::Url;

use crate::error::ErrorKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing secret is empty")]
    EmptySecret,
    #[error("invalid base url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("signed url expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
}

impl SigningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SigningError::EmptySecret => ErrorKind::Internal,
            SigningError::InvalidUrl { .. } => ErrorKind::ValidationFailure,
            SigningError::Expired | SigningError::InvalidSignature => {
                ErrorKind::AuthorizationFailure
            }
        }
    }
}

pub type SigningResult<T> = std::result::Result<T, SigningError>;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    /// `None` for single-file assets, which are served unsigned.
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// HMAC-SHA256 signer for playback URLs. The MAC covers `asset_id:expires`.
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_seconds: u64) -> SigningResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }
        let keyed = HmacSha256::new_from_slice(&secret).map_err(|_| SigningError::EmptySecret)?;
        Ok(Self {
            keyed,
            ttl: Duration::seconds(ttl_seconds as i64),
        })
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn sign(&self, asset_id: &str, base_url: &str) -> SigningResult<SignedUrl> {
        self.sign_at(asset_id, base_url, self.ttl.num_seconds(), Utc::now())
    }

    pub fn sign_with_ttl(
        &self,
        asset_id: &str,
        base_url: &str,
        ttl_seconds: i64,
    ) -> SigningResult<SignedUrl> {
        self.sign_at(asset_id, base_url, ttl_seconds, Utc::now())
    }

    pub fn sign_at(
        &self,
        asset_id: &str,
        base_url: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> SigningResult<SignedUrl> {
        let mut url = Url::parse(base_url).map_err(|err| SigningError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        if is_single_file(&url) {
            return Ok(SignedUrl {
                url: base_url.to_string(),
                expires: None,
                signature: None,
            });
        }
        let expires = now.timestamp() + ttl_seconds.max(0);
        let signature = hex::encode(self.mac(asset_id, expires).finalize().into_bytes());
        url.query_pairs_mut()
            .append_pair("video_id", asset_id)
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        Ok(SignedUrl {
            url: url.into(),
            expires: Some(expires),
            signature: Some(signature),
        })
    }

    pub fn validate(&self, asset_id: &str, expires: i64, signature: &str) -> bool {
        self.check_at(asset_id, expires, signature, Utc::now()).is_ok()
    }

    pub fn check(&self, asset_id: &str, expires: i64, signature: &str) -> SigningResult<()> {
        self.check_at(asset_id, expires, signature, Utc::now())
    }

    /// Rejects expired links before touching the MAC; the digest comparison
    /// itself is constant time.
    pub fn check_at(
        &self,
        asset_id: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> SigningResult<()> {
        if expires <= now.timestamp() {
            return Err(SigningError::Expired);
        }
        let provided = hex::decode(signature).map_err(|_| SigningError::InvalidSignature)?;
        self.mac(asset_id, expires)
            .verify_slice(&provided)
            .map_err(|_| SigningError::InvalidSignature)
    }

    fn mac(&self, asset_id: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(asset_id.as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

fn is_single_file(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".mp4")
}
