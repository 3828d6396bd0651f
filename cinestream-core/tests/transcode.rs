#![cfg(unix)]

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use cinestream_core::media::MANIFEST_NAME;
use cinestream_core::store::{Category, JobFilter, JobStatus, NewContent, SqliteStore};
use cinestream_core::{
    CatalogService, CommandExecutor, ErrorKind, MediaError, MediaSettings, TranscodeWorker,
    Transcoder,
};

const PROBE_OK: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":1920,"height":1080}],"format":{"duration":"95.4"}}"#;

/// Stands in for ffprobe/ffmpeg. A source is "valid media" when its bytes
/// start with `VIDEO`; the encoder writes the manifest it was asked for.
#[derive(Default)]
struct FakeTools {
    probes: AtomicUsize,
    encodes: AtomicUsize,
    fail_encode: bool,
    encode_args: Mutex<Vec<String>>,
}

fn output(code: i32, stdout: &str, stderr: &str) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait]
impl CommandExecutor for FakeTools {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        let inner = command.as_std();
        let program = Path::new(inner.get_program())
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let args: Vec<PathBuf> = inner.get_args().map(PathBuf::from).collect();
        let last = args.last().cloned().unwrap_or_default();

        match program.as_str() {
            "ffprobe" => {
                self.probes.fetch_add(1, Ordering::SeqCst);
                let bytes = std::fs::read(&last)?;
                if bytes.starts_with(b"VIDEO") {
                    Ok(output(0, PROBE_OK, ""))
                } else {
                    Ok(output(1, "", "Invalid data found when processing input"))
                }
            }
            "ffmpeg" => {
                self.encodes.fetch_add(1, Ordering::SeqCst);
                *self.encode_args.lock().unwrap() = args
                    .iter()
                    .map(|arg| arg.display().to_string())
                    .collect();
                if self.fail_encode {
                    return Ok(output(1, "", "Conversion failed!"));
                }
                std::fs::write(&last, "#EXTM3U\n#EXT-X-ENDLIST\n")?;
                Ok(output(0, "", ""))
            }
            other => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unexpected program {other}"),
            )),
        }
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    store: SqliteStore,
    tools: Arc<FakeTools>,
    transcoder: Arc<Transcoder>,
}

fn harness(tools: FakeTools) -> Harness {
    harness_with(tools, false)
}

fn harness_with(tools: FakeTools, encrypt: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let store = SqliteStore::builder()
        .path(root.join("cinema.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    let settings = MediaSettings {
        ffmpeg: PathBuf::from("/usr/bin/ffmpeg"),
        ffprobe: PathBuf::from("/usr/bin/ffprobe"),
        media_root: root.join("media"),
        key_store: root.join("keys"),
        segment_seconds: 6,
        probe_timeout: Duration::from_secs(5),
        encrypt,
        key_base_url: "https://cinema.example.com/api/videos/key".into(),
        allowed_extensions: vec![".mp4".into(), ".mkv".into(), ".mov".into()],
    };
    let tools = Arc::new(tools);
    let executor: Arc<dyn CommandExecutor> = tools.clone();
    let transcoder = Arc::new(Transcoder::new(store.clone(), settings, Some(executor)));
    Harness {
        _dir: dir,
        root,
        store,
        tools,
        transcoder,
    }
}

fn source(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn content(store: &SqliteStore, source: Option<&Path>) -> i64 {
    let mut new = NewContent::new("Inception", Category::SciFi);
    new.source_path = source.map(|path| path.display().to_string());
    store.create_content(&new).unwrap().id
}

fn staging_dirs(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root.join("media").join("hls")) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".staging"))
        .collect()
}

#[tokio::test]
async fn renamed_text_file_is_rejected_by_probe() {
    let h = harness(FakeTools::default());
    let fake = source(&h.root, "notes.mp4", "these are not frames");
    let id = content(&h.store, Some(&fake));

    let err = h.transcoder.transcode(&fake, id).await.unwrap_err();
    assert!(matches!(err, MediaError::InvalidMediaFormat(_)));
    assert_eq!(err.kind(), ErrorKind::MediaProcessingFailure);
    assert_eq!(h.tools.probes.load(Ordering::SeqCst), 1);
    assert_eq!(h.tools.encodes.load(Ordering::SeqCst), 0);
    assert!(h.store.fetch_content(id).unwrap().unwrap().output_location.is_none());
}

#[tokio::test]
async fn disallowed_extension_is_rejected_before_probing() {
    let h = harness(FakeTools::default());
    let text = source(&h.root, "notes.txt", "VIDEO but wrong name");
    let id = content(&h.store, Some(&text));

    let err = h.transcoder.transcode(&text, id).await.unwrap_err();
    assert!(matches!(err, MediaError::UnsupportedExtension(ref ext) if ext == ".txt"));
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(h.tools.probes.load(Ordering::SeqCst), 0);

    let missing = h.root.join("missing.mp4");
    let err = h.transcoder.transcode(&missing, id).await.unwrap_err();
    assert!(matches!(err, MediaError::SourceMissing(_)));
}

#[tokio::test]
async fn successful_transcode_records_output_once() {
    let h = harness(FakeTools::default());
    let movie = source(&h.root, "inception.MP4", "VIDEO frames");
    let id = content(&h.store, Some(&movie));

    let outcome = h.transcoder.transcode_content(id).await.unwrap();
    assert!(!outcome.skipped);
    assert_eq!(outcome.output_location, format!("hls/{id}/master.m3u8"));
    assert_eq!(outcome.duration_seconds, Some(95));
    assert!(h
        .root
        .join("media/hls")
        .join(id.to_string())
        .join(MANIFEST_NAME)
        .exists());
    assert!(staging_dirs(&h.root).is_empty());

    let row = h.store.fetch_content(id).unwrap().unwrap();
    assert_eq!(row.output_location.as_deref(), Some(outcome.output_location.as_str()));
    assert_eq!(row.duration_seconds, 95);

    let again = h.transcoder.transcode_content(id).await.unwrap();
    assert!(again.skipped);
    assert_eq!(again.output_location, outcome.output_location);
    assert_eq!(h.tools.encodes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_encode_leaves_no_partial_output() {
    let h = harness(FakeTools {
        fail_encode: true,
        ..Default::default()
    });
    let movie = source(&h.root, "inception.mkv", "VIDEO frames");
    let id = content(&h.store, Some(&movie));

    let err = h.transcoder.transcode_content(id).await.unwrap_err();
    assert!(matches!(err, MediaError::TranscodeFailed { status: Some(1), .. }));
    assert!(staging_dirs(&h.root).is_empty());
    assert!(!h.root.join("media/hls").join(id.to_string()).exists());
    assert!(h.store.fetch_content(id).unwrap().unwrap().output_location.is_none());
}

#[tokio::test]
async fn encrypted_transcode_keeps_key_material_private() {
    let h = harness_with(FakeTools::default(), true);
    let movie = source(&h.root, "inception.mp4", "VIDEO frames");
    let id = content(&h.store, Some(&movie));

    let outcome = h.transcoder.transcode_content(id).await.unwrap();
    assert!(outcome.encrypted);

    let key_dir = h.root.join("keys").join(id.to_string());
    let key = std::fs::read(key_dir.join("enc.key")).unwrap();
    assert_eq!(key.len(), 16);

    let args = h.tools.encode_args.lock().unwrap().clone();
    let flag = args
        .iter()
        .position(|arg| arg == "-hls_key_info_file")
        .expect("key info passed to encoder");
    let info_path = PathBuf::from(&args[flag + 1]);
    assert_eq!(info_path, key_dir.join("enc.keyinfo"));
    let info = std::fs::read_to_string(&info_path).unwrap();
    let lines: Vec<&str> = info.lines().collect();
    assert_eq!(lines[0], format!("https://cinema.example.com/api/videos/key/{id}"));
    assert_eq!(lines[1], key_dir.join("enc.key").display().to_string());
    assert_eq!(lines[2].len(), 32);

    let public: Vec<String> = std::fs::read_dir(h.root.join("media/hls").join(id.to_string()))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(public, vec![MANIFEST_NAME.to_string()]);
}

#[tokio::test]
async fn failed_encrypted_encode_discards_the_key() {
    let h = harness_with(
        FakeTools {
            fail_encode: true,
            ..Default::default()
        },
        true,
    );
    let movie = source(&h.root, "inception.mov", "VIDEO frames");
    let id = content(&h.store, Some(&movie));

    let err = h.transcoder.transcode_content(id).await.unwrap_err();
    assert!(matches!(err, MediaError::TranscodeFailed { status: Some(1), .. }));
    assert!(h
        .tools
        .encode_args
        .lock()
        .unwrap()
        .iter()
        .any(|arg| arg == "-hls_key_info_file"));
    assert!(!h.root.join("keys").join(id.to_string()).exists());
    assert!(staging_dirs(&h.root).is_empty());
    assert!(h.store.fetch_content(id).unwrap().unwrap().output_location.is_none());
}

#[tokio::test]
async fn content_without_source_cannot_be_transcoded() {
    let h = harness(FakeTools::default());
    let id = content(&h.store, None);
    let err = h.transcoder.transcode_content(id).await.unwrap_err();
    assert!(matches!(err, MediaError::NoSource(_)));
    assert!(matches!(
        h.transcoder.transcode_content(404).await,
        Err(MediaError::ContentNotFound(404))
    ));
}

#[tokio::test]
async fn worker_drains_queue_and_records_failures() {
    let h = harness(FakeTools::default());
    let worker = TranscodeWorker::new(h.store.clone(), Arc::clone(&h.transcoder));
    let catalog = CatalogService::new(h.store.clone()).with_waker(worker.waker());

    let good = source(&h.root, "good.mp4", "VIDEO frames");
    let bad = source(&h.root, "bad.mp4", "plain text");
    let mut new = NewContent::new("Good", Category::Drama);
    new.source_path = Some(good.display().to_string());
    let good_id = catalog.create_content(&new).unwrap().id;
    let mut new = NewContent::new("Bad", Category::Drama);
    new.source_path = Some(bad.display().to_string());
    let bad_id = catalog.create_content(&new).unwrap().id;
    catalog
        .create_content(&NewContent::new("No source", Category::Drama))
        .unwrap();

    let queued = h.store.list_jobs(&JobFilter::default()).unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|job| job.status == JobStatus::Queued));

    let summary = worker.run_pending().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let failed = h
        .store
        .list_jobs(&JobFilter {
            status: Some(JobStatus::Failed),
            limit: None,
        })
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].content_id, bad_id);
    assert_eq!(failed[0].attempts, 1);
    assert!(failed[0]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("invalid media format"));
    assert!(h.store.fetch_content(good_id).unwrap().unwrap().output_location.is_some());

    // Fix the source and re-arm the failed job.
    std::fs::write(&bad, "VIDEO now").unwrap();
    assert_eq!(h.store.requeue_failed(Some(bad_id)).unwrap(), 1);
    let summary = worker.run_pending().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    let job = h
        .store
        .list_jobs(&JobFilter::default())
        .unwrap()
        .into_iter()
        .find(|job| job.content_id == bad_id)
        .unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 2);
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn job_orphaned_by_a_dead_worker_is_recovered() {
    let h = harness(FakeTools::default());
    let movie = source(&h.root, "inception.mp4", "VIDEO frames");
    let id = content(&h.store, Some(&movie));
    h.store.enqueue_transcode(id).unwrap();

    let claimed = h.store.claim_next_job().unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(h.store.requeue_failed(None).unwrap(), 0);
    assert_eq!(h.store.enqueue_transcode(id).unwrap().status, JobStatus::Running);
    assert!(h.store.claim_next_job().unwrap().is_none());

    let patient = TranscodeWorker::new(h.store.clone(), Arc::clone(&h.transcoder));
    assert_eq!(patient.recover_stale().unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let worker = TranscodeWorker::new(h.store.clone(), Arc::clone(&h.transcoder))
        .with_stale_after(Duration::ZERO);
    assert_eq!(worker.recover_stale().unwrap(), 1);
    let summary = worker.run_pending().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let job = &h.store.list_jobs(&JobFilter::default()).unwrap()[0];
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 2);
    assert!(h.store.fetch_content(id).unwrap().unwrap().output_location.is_some());
}
