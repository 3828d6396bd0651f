use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("missing secret: {0}")]
    MissingSecret(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Failure classes shared by every service; the HTTP layer maps them to
/// status codes and the CLI prints them as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ExternalServiceFailure,
    ValidationFailure,
    MediaProcessingFailure,
    AuthorizationFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ExternalServiceFailure => "external_service_failure",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::MediaProcessingFailure => "media_processing_failure",
            ErrorKind::AuthorizationFailure => "authorization_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
