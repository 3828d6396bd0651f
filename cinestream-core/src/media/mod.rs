mod encryption;
mod probe;
mod transcoder;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::CinestreamConfig;
use crate::error::ErrorKind;
use crate::store::StoreError;

pub use encryption::{key_path, EncryptionKey};
pub use probe::{probe_media, ProbeReport};
pub use transcoder::{TranscodeOutcome, Transcoder, MANIFEST_NAME};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("invalid media format: {0}")]
    InvalidMediaFormat(String),
    #[error("transcode failed (status {status:?}): {stderr}")]
    TranscodeFailed { status: Option<i32>, stderr: String },
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("source media missing at {0}")]
    SourceMissing(PathBuf),
    #[error("content {0} not found")]
    ContentNotFound(i64),
    #[error("content {0} has no source media")]
    NoSource(i64),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MediaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::UnsupportedExtension(_) => ErrorKind::ValidationFailure,
            MediaError::InvalidMediaFormat(_)
            | MediaError::TranscodeFailed { .. }
            | MediaError::ProbeTimeout(_)
            | MediaError::Probe(_) => ErrorKind::MediaProcessingFailure,
            MediaError::SourceMissing(_)
            | MediaError::ContentNotFound(_)
            | MediaError::NoSource(_) => ErrorKind::NotFound,
            MediaError::Io { .. } => ErrorKind::Internal,
            MediaError::Store(err) => err.kind(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.kill_on_drop(true).output().await
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub media_root: PathBuf,
    pub key_store: PathBuf,
    pub segment_seconds: u32,
    pub probe_timeout: Duration,
    pub encrypt: bool,
    pub key_base_url: String,
    pub allowed_extensions: Vec<String>,
}

impl MediaSettings {
    pub fn from_config(config: &CinestreamConfig) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.media.ffmpeg),
            ffprobe: PathBuf::from(&config.media.ffprobe),
            media_root: config.media_root(),
            key_store: config.key_store(),
            segment_seconds: config.media.segment_seconds.max(1),
            probe_timeout: Duration::from_secs(config.media.probe_timeout_seconds.max(1)),
            encrypt: config.media.encrypt,
            key_base_url: config.media.key_base_url.clone(),
            allowed_extensions: config
                .media
                .allowed_extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
        }
    }

    pub fn hls_root(&self) -> PathBuf {
        self.media_root.join("hls")
    }

    pub fn extension_allowed(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        self.allowed_extensions.iter().any(|ext| *ext == extension)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}
