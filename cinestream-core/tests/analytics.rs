use std::path::Path;

use chrono::NaiveDate;
use tempfile::TempDir;

use cinestream_core::analytics::CSV_HEADER;
use cinestream_core::store::{completion_rate, Category, NewContent, SqliteStore};
use cinestream_core::{AnalyticsError, AnalyticsService, ErrorKind, ProgressEvent, ProgressReport};

fn temp_store(dir: &Path) -> SqliteStore {
    let store = SqliteStore::builder()
        .path(dir.join("cinema.sqlite"))
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn content(store: &SqliteStore, title: &str, duration_seconds: i64) -> i64 {
    let mut new = NewContent::new(title, Category::SciFi);
    new.duration_seconds = duration_seconds;
    new.release_date = NaiveDate::from_ymd_opt(2010, 7, 16);
    store.create_content(&new).unwrap().id
}

fn start() -> ProgressReport {
    ProgressReport {
        event: Some(ProgressEvent::Start),
        ..Default::default()
    }
}

fn delta(seconds: f64) -> ProgressReport {
    ProgressReport {
        event: Some(ProgressEvent::Progress),
        watched_seconds_delta: Some(seconds),
        ..Default::default()
    }
}

fn position(seconds: f64) -> ProgressReport {
    ProgressReport {
        event: Some(ProgressEvent::Progress),
        watched_seconds: Some(seconds),
        ..Default::default()
    }
}

#[test]
fn negative_deltas_never_decrease_watch_time() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.report_progress("alice", Some("s1"), id, &start()).unwrap();
    service.report_progress("alice", Some("s1"), id, &delta(30.0)).unwrap();
    let after_negative = service
        .report_progress("alice", Some("s1"), id, &delta(-5.0))
        .unwrap();
    assert_eq!(after_negative.added_seconds, 0.0);
    let nan = service
        .report_progress("alice", Some("s1"), id, &delta(f64::NAN))
        .unwrap();
    assert_eq!(nan.added_seconds, 0.0);

    let log = store.fetch_watch_log("alice", id).unwrap().unwrap();
    assert_eq!(log.watch_time_seconds, 30.0);
    assert_eq!(log.views, 1);
}

#[test]
fn repeated_absolute_position_adds_nothing() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.report_progress("alice", Some("s1"), id, &start()).unwrap();
    let first = service
        .report_progress("alice", Some("s1"), id, &position(120.0))
        .unwrap();
    assert_eq!(first.added_seconds, 120.0);
    let repeat = service
        .report_progress("alice", Some("s1"), id, &position(120.0))
        .unwrap();
    assert_eq!(repeat.added_seconds, 0.0);
    let seek_back = service
        .report_progress("alice", Some("s1"), id, &position(60.0))
        .unwrap();
    assert_eq!(seek_back.added_seconds, 0.0);
    let forward = service
        .report_progress("alice", Some("s1"), id, &position(90.0))
        .unwrap();
    assert_eq!(forward.added_seconds, 30.0);
    assert_eq!(forward.total_watch_time_minutes, 2.5);

    // Without a session there is nothing to diff against.
    let sessionless = service
        .report_progress("alice", None, id, &position(500.0))
        .unwrap();
    assert_eq!(sessionless.added_seconds, 0.0);
}

#[test]
fn start_resets_the_session_position() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.report_progress("alice", Some("s1"), id, &start()).unwrap();
    service.report_progress("alice", Some("s1"), id, &position(100.0)).unwrap();
    service.report_progress("alice", Some("s1"), id, &start()).unwrap();
    assert_eq!(
        store.session_value("s1", &format!("watch:{id}:position")).unwrap().as_deref(),
        Some("0")
    );
    let replay = service
        .report_progress("alice", Some("s1"), id, &position(40.0))
        .unwrap();
    assert_eq!(replay.added_seconds, 40.0);
    assert_eq!(store.fetch_content(id).unwrap().unwrap().total_plays, 2);
}

#[test]
fn mixed_report_moves_the_position_baseline() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.report_progress("alice", Some("s1"), id, &start()).unwrap();
    let mixed = ProgressReport {
        event: Some(ProgressEvent::Progress),
        watched_seconds_delta: Some(10.0),
        watched_seconds: Some(10.0),
        ..Default::default()
    };
    let first = service.report_progress("alice", Some("s1"), id, &mixed).unwrap();
    assert_eq!(first.added_seconds, 10.0);
    let next = service
        .report_progress("alice", Some("s1"), id, &position(20.0))
        .unwrap();
    assert_eq!(next.added_seconds, 10.0);

    let log = store.fetch_watch_log("alice", id).unwrap().unwrap();
    assert_eq!(log.watch_time_seconds, 20.0);
}

#[test]
fn fresh_session_only_records_the_baseline() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    for session in ["m1", "m2"] {
        let applied = service
            .report_progress("alice", Some(session), id, &position(300.0))
            .unwrap();
        assert_eq!(applied.added_seconds, 0.0);
    }
    assert_eq!(store.fetch_content(id).unwrap().unwrap().total_watch_seconds, 0.0);

    let advanced = service
        .report_progress("alice", Some("m2"), id, &position(330.0))
        .unwrap();
    assert_eq!(advanced.added_seconds, 30.0);
}

#[test]
fn unique_viewers_follow_log_creation() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.report_progress("alice", Some("a"), id, &delta(10.0)).unwrap();
    service.report_progress("alice", Some("a"), id, &start()).unwrap();
    service.report_progress("bob", Some("b"), id, &start()).unwrap();
    service.report_progress("bob", Some("b"), id, &start()).unwrap();

    let row = store.fetch_content(id).unwrap().unwrap();
    assert_eq!(row.unique_viewers, 2);
    assert_eq!(row.total_plays, 3);
}

#[test]
fn completion_rate_is_clamped() {
    assert_eq!(completion_rate(1_000_000.0, 60, 1), 100.0);
    assert_eq!(completion_rate(30.0, 0, 0), 0.0);
    assert_eq!(completion_rate(30.0, 60, 0), 50.0);
    assert_eq!(completion_rate(-10.0, 60, 3), 0.0);
    assert_eq!(completion_rate(f64::INFINITY, 60, 3), 0.0);

    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let short = content(&store, "Short", 10);
    service.report_progress("alice", Some("s"), short, &start()).unwrap();
    let huge = service
        .report_progress("alice", Some("s"), short, &delta(1e9))
        .unwrap();
    assert_eq!(huge.completion_rate, 100.0);

    let unknown_length = content(&store, "Unknown length", 0);
    let degenerate = service
        .report_progress("alice", Some("s"), unknown_length, &delta(50.0))
        .unwrap();
    assert_eq!(degenerate.completion_rate, 0.0);
}

#[test]
fn rating_twice_replaces_the_first() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    service.rate("alice", id, 3).unwrap();
    let summary = service.rate("alice", id, 5).unwrap();
    assert_eq!(summary.average_rating, 5.0);
    assert_eq!(summary.total_ratings, 1);

    let summary = service.rate("bob", id, 2).unwrap();
    assert_eq!(summary.average_rating, 3.5);
    assert_eq!(summary.total_ratings, 2);

    for bad in [0, 6, -1] {
        let err = service.rate("alice", id, bad).unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }
    assert_eq!(service.rate("alice", 9_999, 4).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn reconcile_matches_incremental_aggregates() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 300);

    for (user, session) in [("alice", "a"), ("bob", "b"), ("carol", "c")] {
        service.report_progress(user, Some(session), id, &start()).unwrap();
        service.report_progress(user, Some(session), id, &delta(45.5)).unwrap();
        service.report_progress(user, Some(session), id, &position(200.0)).unwrap();
    }
    service.rate("alice", id, 4).unwrap();
    service.rate("bob", id, 5).unwrap();

    let incremental = store.fetch_content(id).unwrap().unwrap();
    let reconciled = service.reconcile(id).unwrap();
    assert_eq!(reconciled.total_plays, incremental.total_plays);
    assert_eq!(reconciled.unique_viewers, incremental.unique_viewers);
    assert!((reconciled.total_watch_seconds - incremental.total_watch_seconds).abs() < 1e-6);
    assert_eq!(reconciled.completion_rate, incremental.completion_rate);
    assert_eq!(reconciled.average_rating, 4.5);
    assert_eq!(reconciled.rating_count, 2);
}

#[test]
fn summary_and_regions() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let id = content(&store, "Inception", 600);

    let regions = [("alice", Some("ET")), ("bob", Some("ET")), ("carol", Some("KE")), ("dan", None)];
    for (user, region) in regions {
        let report = ProgressReport {
            event: Some(ProgressEvent::Start),
            watched_seconds_delta: Some(300.0),
            region: region.map(str::to_string),
            ..Default::default()
        };
        service.report_progress(user, Some(user), id, &report).unwrap();
    }

    let summary = service.summary().unwrap();
    assert_eq!(summary.total_views, 4);
    assert_eq!(summary.unique_viewers, 4);
    assert_eq!(summary.total_watch_hours, 0.33);
    assert_eq!(summary.average_watch_minutes_per_view, 5.0);
    assert_eq!(summary.completion_rate, 50.0);
    assert_eq!(summary.top_regions[0].region, "ET");
    assert_eq!(summary.top_regions[0].percent, 50.0);
    assert!(summary.top_regions.iter().any(|r| r.region == "Unknown"));
}

#[test]
fn csv_export_has_one_row_per_content() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let service = AnalyticsService::new(store.clone());
    let a = content(&store, "Inception", 600);
    content(&store, "=HYPERLINK(\"x\")", 600);
    service.report_progress("alice", Some("s"), a, &start()).unwrap();
    service.report_progress("alice", Some("s"), a, &delta(150.0)).unwrap();

    let mut out = Vec::new();
    assert_eq!(service.export_csv(&mut out).unwrap(), 2);
    let text = String::from_utf8(out).unwrap();
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADER.to_vec());
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    let inception = rows.iter().find(|r| &r[0] == "Inception").unwrap();
    assert_eq!(&inception[1], "Sci-Fi");
    assert_eq!(&inception[2], "1");
    assert_eq!(&inception[5], "2");
    assert_eq!(&inception[6], "25.00");
    assert_eq!(&inception[7], "2010-07-16");
    assert!(rows.iter().any(|r| r[0].starts_with("'=")));
}

#[test]
fn progress_for_missing_content_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = AnalyticsService::new(temp_store(dir.path()));
    let err = service
        .report_progress("alice", Some("s"), 42, &start())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = service.report_progress(" ", Some("s"), 42, &start()).unwrap_err();
    assert!(matches!(err, AnalyticsError::Validation(_)));
}
