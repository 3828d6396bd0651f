mod export;

use std::io::Write;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::store::{
    round2, Content, ProgressDelta, ProgressUpdate, RegionShare, SqliteStore, StoreError,
};

pub use export::{write_csv, CSV_HEADER};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid analytics input: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
}

impl AnalyticsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyticsError::Validation(_) => ErrorKind::ValidationFailure,
            AnalyticsError::Store(err) => err.kind(),
            AnalyticsError::Csv(_) => ErrorKind::Internal,
        }
    }
}

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    Start,
    Progress,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReport {
    pub event: Option<ProgressEvent>,
    pub watched_seconds_delta: Option<f64>,
    pub watched_seconds: Option<f64>,
    pub region: Option<String>,
}

impl ProgressReport {
    /// A usable relative delta wins; otherwise an absolute position is
    /// diffed against the session's last one.
    fn delta(&self) -> ProgressDelta {
        match (self.watched_seconds_delta, self.watched_seconds) {
            (Some(delta), position) if delta.is_finite() && delta > 0.0 => {
                ProgressDelta::Relative {
                    seconds: delta,
                    position,
                }
            }
            (_, Some(position)) if position.is_finite() => ProgressDelta::Absolute(position),
            _ => ProgressDelta::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressResponse {
    pub ok: bool,
    pub event: ProgressEvent,
    pub added_seconds: f64,
    pub total_watch_time_minutes: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub average_rating: f64,
    pub total_ratings: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub total_views: i64,
    pub unique_viewers: i64,
    pub total_watch_hours: f64,
    pub average_watch_minutes_per_view: f64,
    pub completion_rate: f64,
    pub top_regions: Vec<RegionShare>,
}

#[derive(Debug, Clone)]
pub struct AnalyticsService {
    store: SqliteStore,
}

impl AnalyticsService {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub fn report_progress(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        content_id: i64,
        report: &ProgressReport,
    ) -> AnalyticsResult<ProgressResponse> {
        if user_id.trim().is_empty() {
            return Err(AnalyticsError::Validation("user id is required".into()));
        }
        let event = report.event.unwrap_or(ProgressEvent::Progress);
        let update = ProgressUpdate {
            session_id,
            user_id,
            content_id,
            start: event == ProgressEvent::Start,
            delta: report.delta(),
            region: report
                .region
                .as_deref()
                .map(str::trim)
                .filter(|region| !region.is_empty()),
            at: Utc::now(),
        };
        let applied = self.store.apply_progress(&update)?;
        debug!(
            user_id,
            content_id,
            added = applied.added_seconds,
            first_view = applied.first_view,
            "progress applied"
        );
        Ok(ProgressResponse {
            ok: true,
            event,
            added_seconds: applied.added_seconds,
            total_watch_time_minutes: round2(applied.log.watch_time_seconds / 60.0),
            completion_rate: applied.completion_rate,
        })
    }

    pub fn rate(&self, user_id: &str, content_id: i64, value: i64) -> AnalyticsResult<RatingSummary> {
        if user_id.trim().is_empty() {
            return Err(AnalyticsError::Validation("user id is required".into()));
        }
        let value = u8::try_from(value)
            .ok()
            .filter(|v| (1..=5).contains(v))
            .ok_or_else(|| {
                AnalyticsError::Validation(format!("rating must be between 1 and 5, got {value}"))
            })?;
        let (average_rating, total_ratings) = self.store.upsert_rating(user_id, content_id, value)?;
        Ok(RatingSummary {
            average_rating,
            total_ratings,
        })
    }

    pub fn reconcile(&self, content_id: i64) -> AnalyticsResult<Content> {
        Ok(self.store.reconcile_content(content_id)?)
    }

    pub fn reconcile_all(&self) -> AnalyticsResult<usize> {
        let contents = self.store.list_content()?;
        for content in &contents {
            self.store.reconcile_content(content.id)?;
        }
        Ok(contents.len())
    }

    pub fn summary(&self) -> AnalyticsResult<AnalyticsSummary> {
        let totals = self.store.site_totals()?;
        let total_watch_minutes = totals.total_watch_seconds / 60.0;
        let average_watch_minutes_per_view = if totals.total_views > 0 {
            total_watch_minutes / totals.total_views as f64
        } else {
            0.0
        };
        let completion_rate = if totals.weighted_duration_seconds > 0.0 {
            (totals.total_watch_seconds / totals.weighted_duration_seconds * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Ok(AnalyticsSummary {
            total_views: totals.total_views,
            unique_viewers: totals.unique_viewers,
            total_watch_hours: round2(total_watch_minutes / 60.0),
            average_watch_minutes_per_view: round2(average_watch_minutes_per_view),
            completion_rate: round2(completion_rate),
            top_regions: self.store.top_regions(5)?,
        })
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> AnalyticsResult<usize> {
        let rows = self.store.content_analytics_rows()?;
        Ok(write_csv(&rows, writer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_delta_wins_over_absolute_position() {
        let report = ProgressReport {
            watched_seconds_delta: Some(12.0),
            watched_seconds: Some(300.0),
            ..Default::default()
        };
        assert_eq!(
            report.delta(),
            ProgressDelta::Relative {
                seconds: 12.0,
                position: Some(300.0)
            }
        );

        let report = ProgressReport {
            watched_seconds_delta: Some(-5.0),
            watched_seconds: Some(300.0),
            ..Default::default()
        };
        assert_eq!(report.delta(), ProgressDelta::Absolute(300.0));

        let report = ProgressReport {
            watched_seconds_delta: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(report.delta(), ProgressDelta::None);
    }
}
