use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::encryption::EncryptionKey;
use super::probe::probe_media;
use super::{CommandExecutor, MediaError, MediaResult, MediaSettings, SystemCommandExecutor};
use crate::store::SqliteStore;

pub const MANIFEST_NAME: &str = "master.m3u8";
const SEGMENT_PATTERN: &str = "segment_%03d.ts";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscodeOutcome {
    pub content_id: i64,
    pub output_location: String,
    pub encrypted: bool,
    pub duration_seconds: Option<i64>,
    /// The content already had an output; nothing was encoded.
    pub skipped: bool,
}

/// Single-rendition HLS packager. Output is staged next to the final
/// directory and only renamed into place after the encoder succeeds, so the
/// content row never references a partial manifest.
pub struct Transcoder {
    store: SqliteStore,
    settings: MediaSettings,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Transcoder {
    pub fn new(
        store: SqliteStore,
        settings: MediaSettings,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            store,
            settings,
            executor,
        }
    }

    pub fn settings(&self) -> &MediaSettings {
        &self.settings
    }

    pub fn output_location(content_id: i64) -> String {
        format!("hls/{content_id}/{MANIFEST_NAME}")
    }

    /// Transcodes the source recorded on the content row. Relative sources
    /// resolve against the media root.
    pub async fn transcode_content(&self, content_id: i64) -> MediaResult<TranscodeOutcome> {
        let content = self
            .store
            .fetch_content(content_id)?
            .ok_or(MediaError::ContentNotFound(content_id))?;
        let source = content
            .source_path
            .filter(|path| !path.trim().is_empty())
            .ok_or(MediaError::NoSource(content_id))?;
        let source = PathBuf::from(source);
        let source = if source.is_absolute() {
            source
        } else {
            self.settings.media_root.join(source)
        };
        self.transcode(&source, content_id).await
    }

    pub async fn transcode(&self, source: &Path, content_id: i64) -> MediaResult<TranscodeOutcome> {
        let content = self
            .store
            .fetch_content(content_id)?
            .ok_or(MediaError::ContentNotFound(content_id))?;
        if let Some(existing) = content.output_location {
            debug!(content_id, %existing, "output already recorded; skipping transcode");
            return Ok(TranscodeOutcome {
                content_id,
                output_location: existing,
                encrypted: false,
                duration_seconds: Some(content.duration_seconds).filter(|d| *d > 0),
                skipped: true,
            });
        }

        let extension = source
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.settings.extension_allowed(&extension) {
            return Err(MediaError::UnsupportedExtension(if extension.is_empty() {
                source.display().to_string()
            } else {
                format!(".{extension}")
            }));
        }
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(MediaError::SourceMissing(source.to_path_buf()));
        }

        let probe = probe_media(
            self.executor.as_ref(),
            &self.settings.ffprobe,
            source,
            self.settings.probe_timeout,
        )
        .await?;
        let duration_seconds = probe.duration_seconds.map(|d| d.round() as i64);

        let hls_root = self.settings.hls_root();
        let final_dir = hls_root.join(content_id.to_string());
        if fs::try_exists(final_dir.join(MANIFEST_NAME))
            .await
            .unwrap_or(false)
        {
            info!(content_id, "adopting previously packaged output");
            return self.record(content_id, false, duration_seconds).await;
        }

        let staging = hls_root.join(format!(".staging-{content_id}-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&staging)
            .await
            .map_err(|err| MediaError::io(&staging, err))?;

        let result = self.encode(source, content_id, &staging).await;
        let encrypted = match result {
            Ok(encrypted) => encrypted,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging).await;
                if self.settings.encrypt {
                    EncryptionKey::discard(&self.settings.key_store, content_id).await;
                }
                return Err(err);
            }
        };

        if fs::try_exists(&final_dir).await.unwrap_or(false) {
            fs::remove_dir_all(&final_dir)
                .await
                .map_err(|err| MediaError::io(&final_dir, err))?;
        }
        if let Err(err) = fs::rename(&staging, &final_dir).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(MediaError::io(&final_dir, err));
        }
        self.record(content_id, encrypted, duration_seconds).await
    }

    async fn encode(&self, source: &Path, content_id: i64, staging: &Path) -> MediaResult<bool> {
        let mut command = Command::new(&self.settings.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-c:v")
            .arg("h264")
            .arg("-c:a")
            .arg("aac")
            .arg("-preset")
            .arg("fast");

        let encrypted = if self.settings.encrypt {
            let key = EncryptionKey::generate(&self.settings.key_store, content_id).await?;
            let key_url = format!(
                "{}/{content_id}",
                self.settings.key_base_url.trim_end_matches('/')
            );
            let info = key.write_key_info(&key_url).await?;
            command.arg("-hls_key_info_file").arg(info);
            true
        } else {
            false
        };

        command
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg(self.settings.segment_seconds.to_string())
            .arg("-hls_playlist_type")
            .arg("vod")
            .arg("-hls_segment_filename")
            .arg(staging.join(SEGMENT_PATTERN))
            .arg(staging.join(MANIFEST_NAME));

        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| MediaError::TranscodeFailed {
                status: None,
                stderr: format!("failed to run {}: {err}", self.settings.ffmpeg.display()),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!(content_id, status = ?output.status.code(), "encoder exited with failure");
            return Err(MediaError::TranscodeFailed {
                status: output.status.code(),
                stderr,
            });
        }
        if !fs::try_exists(staging.join(MANIFEST_NAME))
            .await
            .unwrap_or(false)
        {
            return Err(MediaError::TranscodeFailed {
                status: output.status.code(),
                stderr: "encoder reported success but wrote no manifest".into(),
            });
        }
        Ok(encrypted)
    }

    async fn record(
        &self,
        content_id: i64,
        encrypted: bool,
        duration_seconds: Option<i64>,
    ) -> MediaResult<TranscodeOutcome> {
        if let Some(duration) = duration_seconds {
            self.store.set_duration_if_unknown(content_id, duration)?;
        }
        let location = Self::output_location(content_id);
        let recorded = self.store.set_output_location(content_id, &location)?;
        if !recorded {
            debug!(content_id, "output recorded concurrently");
        }
        let output_location = self
            .store
            .fetch_content(content_id)?
            .and_then(|content| content.output_location)
            .unwrap_or(location);
        info!(content_id, %output_location, encrypted, "transcode complete");
        Ok(TranscodeOutcome {
            content_id,
            output_location,
            encrypted,
            duration_seconds,
            skipped: false,
        })
    }
}
