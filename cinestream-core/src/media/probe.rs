use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use super::{CommandExecutor, MediaError, MediaResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Runs ffprobe and requires at least one video stream. Anything ffprobe
/// cannot parse is reported as an invalid media format.
pub async fn probe_media(
    executor: &dyn CommandExecutor,
    ffprobe: &Path,
    path: &Path,
    limit: Duration,
) -> MediaResult<ProbeReport> {
    let mut command = Command::new(ffprobe);
    command
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path);

    let output = match timeout(limit, executor.run(&mut command)).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(MediaError::Probe(format!(
                "failed to run {}: {err}",
                ffprobe.display()
            )))
        }
        Err(_) => return Err(MediaError::ProbeTimeout(limit)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(path = %path.display(), %stderr, "ffprobe rejected source");
        return Err(MediaError::InvalidMediaFormat(if stderr.is_empty() {
            "ffprobe could not read the file".to_string()
        } else {
            stderr
        }));
    }

    parse_probe(&output.stdout)
}

pub(crate) fn parse_probe(stdout: &[u8]) -> MediaResult<ProbeReport> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|err| MediaError::InvalidMediaFormat(format!("unreadable probe output: {err}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::InvalidMediaFormat("no video stream found".into()))?;
    let duration_seconds = parsed
        .format
        .duration
        .as_deref()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0);
    Ok(ProbeReport {
        video_codec: video.codec_name.clone(),
        width: video.width,
        height: video.height,
        duration_seconds,
    })
}
