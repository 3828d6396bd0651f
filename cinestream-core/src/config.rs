use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CinestreamConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub server: ServerSection,
    pub gateway: GatewaySection,
    pub signing: SigningSection,
    pub media: MediaSection,
    pub booking: BookingSection,
    pub subscription: SubscriptionSection,
    pub mail: MailSection,
}

impl CinestreamConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir).join("cinema.sqlite")
    }

    pub fn media_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.media_root)
    }

    pub fn key_store(&self) -> PathBuf {
        self.resolve_path(&self.paths.key_store)
    }

    pub fn qr_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.qr_dir)
    }

    pub fn signing_secret(&self) -> Result<Vec<u8>> {
        let path = self.resolve_path(&self.signing.secret_path);
        let secret = std::fs::read(&path).map_err(|source| ConfigError::Io {
            source,
            path: path.clone(),
        })?;
        let trimmed = trim_ascii_whitespace(&secret);
        if trimmed.is_empty() {
            return Err(ConfigError::MissingSecret(format!(
                "signing secret at {} is empty",
                path.display()
            )));
        }
        Ok(trimmed.to_vec())
    }

    pub fn gateway_secret(&self) -> Result<String> {
        std::env::var(&self.gateway.secret_key_env).map_err(|_| {
            ConfigError::MissingSecret(format!(
                "gateway secret env var {} not set",
                self.gateway.secret_key_env
            ))
        })
    }

    pub fn callback_url(&self) -> String {
        join_url(&self.system.public_base_url, &self.gateway.callback_path)
    }

    pub fn return_url(&self) -> String {
        join_url(&self.system.public_base_url, &self.gateway.return_path)
    }

    pub fn ticket_url(&self, reservation_id: i64) -> String {
        join_url(
            &self.system.public_base_url,
            &format!("/ticket/{reservation_id}"),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub media_root: String,
    pub key_store: String,
    pub qr_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    pub base_url: String,
    pub secret_key_env: String,
    pub currency: String,
    pub timeout_seconds: u64,
    pub callback_path: String,
    pub return_path: String,
}

impl GatewaySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningSection {
    pub secret_path: String,
    pub ttl_seconds: u64,
    pub media_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub segment_seconds: u32,
    pub probe_timeout_seconds: u64,
    pub encrypt: bool,
    pub key_base_url: String,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingSection {
    pub max_rows: u32,
    pub reference_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSection {
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSection {
    pub enabled: bool,
    pub from_email: String,
    pub from_name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username_env: String,
    pub password_env: String,
}

pub fn load_cinestream_config<P: AsRef<Path>>(path: P) -> Result<CinestreamConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|idx| idx + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/cinestream.toml");
        let config = load_cinestream_config(path).expect("config should parse");
        assert_eq!(config.system.node_name, "cinestream-primary");
        assert_eq!(config.gateway.currency, "ETB");
        assert!(config
            .media
            .allowed_extensions
            .iter()
            .any(|ext| ext == ".mp4"));
        assert_eq!(
            config.callback_url(),
            "https://cinema.example.com/payment/callback"
        );
    }

    #[test]
    fn resolves_relative_paths_against_base_dir() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/cinestream.toml");
        let mut config = load_cinestream_config(path).unwrap();
        config.paths.base_dir = "/srv/cine".into();
        assert_eq!(config.media_root(), PathBuf::from("/srv/cine/media"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/cine/data/cinema.sqlite")
        );
        assert_eq!(
            config.resolve_path("/abs/keys"),
            PathBuf::from("/abs/keys")
        );
    }

    #[test]
    fn signing_secret_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/cinestream.toml");
        let mut config = load_cinestream_config(path).unwrap();
        config.paths.base_dir = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("signing.key"), b"  top-secret\n").unwrap();
        config.signing.secret_path = "signing.key".into();
        assert_eq!(config.signing_secret().unwrap(), b"top-secret".to_vec());

        std::fs::write(dir.path().join("signing.key"), b"\n").unwrap();
        assert!(matches!(
            config.signing_secret(),
            Err(ConfigError::MissingSecret(_))
        ));
    }
}
