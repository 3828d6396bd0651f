use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::models::{Category, Content, WatchLog};
use super::{SqliteStore, StoreError, StoreResult};

/// How much watch time a progress report contributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressDelta {
    None,
    /// Seconds watched since the previous report. A position sent alongside
    /// still moves the session baseline.
    Relative { seconds: f64, position: Option<f64> },
    /// Cumulative playback position; only the advance over the last position
    /// seen in the same session counts. A session without a baseline only
    /// records it.
    Absolute(f64),
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate<'a> {
    pub session_id: Option<&'a str>,
    pub user_id: &'a str,
    pub content_id: i64,
    pub start: bool,
    pub delta: ProgressDelta,
    pub region: Option<&'a str>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressApplication {
    pub added_seconds: f64,
    pub first_view: bool,
    pub log: WatchLog,
    pub content_total_watch_seconds: f64,
    pub total_plays: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentAnalyticsRow {
    pub content_id: i64,
    pub title: String,
    pub category: Category,
    pub total_plays: i64,
    pub unique_viewers: i64,
    pub average_rating: f64,
    pub total_watch_minutes: i64,
    pub completion_rate: f64,
    pub release_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegionShare {
    pub region: String,
    pub viewers: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SiteTotals {
    pub total_views: i64,
    pub unique_viewers: i64,
    pub total_watch_seconds: f64,
    pub weighted_duration_seconds: f64,
}

/// `min(100, watched / (duration * max(1, plays)) * 100)`, rounded to two
/// decimals. Degenerate inputs (no duration, negative totals) yield 0.
pub fn completion_rate(total_watch_seconds: f64, duration_seconds: i64, total_plays: i64) -> f64 {
    if duration_seconds <= 0 || !total_watch_seconds.is_finite() || total_watch_seconds <= 0.0 {
        return 0.0;
    }
    let denominator = duration_seconds as f64 * total_plays.max(1) as f64;
    let rate = (total_watch_seconds / denominator * 100.0).clamp(0.0, 100.0);
    round2(rate)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn sanitize_seconds(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn valid_position(position: f64) -> bool {
    position.is_finite() && position >= 0.0
}

fn position_key(content_id: i64) -> String {
    format!("watch:{content_id}:position")
}

impl SqliteStore {
    /// Applies one progress report atomically. Counters are bumped with
    /// in-statement increments so concurrent reporters for the same content
    /// never lose updates.
    pub fn apply_progress(&self, update: &ProgressUpdate<'_>) -> StoreResult<ProgressApplication> {
        self.write_transaction(|tx| {
            let duration_seconds: i64 = tx
                .query_row(
                    "SELECT duration_seconds FROM content WHERE id = ?1",
                    [update.content_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::not_found("content", update.content_id))?;

            let created = tx.execute(
                "INSERT INTO watch_logs (user_id, content_id, views, watch_time_seconds)
                 VALUES (?1, ?2, 0, 0)
                 ON CONFLICT(user_id, content_id) DO NOTHING",
                params![update.user_id, update.content_id],
            )?;
            let first_view = created == 1;
            if first_view {
                tx.execute(
                    "UPDATE content SET unique_viewers = unique_viewers + 1 WHERE id = ?1",
                    [update.content_id],
                )?;
            }

            if update.start {
                tx.execute(
                    "UPDATE watch_logs SET views = views + 1 WHERE user_id = ?1 AND content_id = ?2",
                    params![update.user_id, update.content_id],
                )?;
                tx.execute(
                    "UPDATE content SET total_plays = total_plays + 1 WHERE id = ?1",
                    [update.content_id],
                )?;
                if let Some(session_id) = update.session_id {
                    session_put(tx, session_id, &position_key(update.content_id), "0")?;
                }
            }

            let added_seconds = match update.delta {
                ProgressDelta::None => 0.0,
                ProgressDelta::Relative { seconds, position } => {
                    if let (Some(session_id), Some(position)) =
                        (update.session_id, position.filter(|p| valid_position(*p)))
                    {
                        let key = position_key(update.content_id);
                        session_put(tx, session_id, &key, &position.to_string())?;
                    }
                    sanitize_seconds(seconds)
                }
                ProgressDelta::Absolute(position) => match update.session_id {
                    Some(session_id) if valid_position(position) => {
                        let key = position_key(update.content_id);
                        let last = session_get(tx, session_id, &key)?
                            .and_then(|value| value.parse::<f64>().ok());
                        session_put(tx, session_id, &key, &position.to_string())?;
                        last.map_or(0.0, |last| sanitize_seconds(position - last))
                    }
                    _ => 0.0,
                },
            };

            if added_seconds > 0.0 {
                tx.execute(
                    "UPDATE watch_logs SET watch_time_seconds = watch_time_seconds + ?1
                     WHERE user_id = ?2 AND content_id = ?3",
                    params![added_seconds, update.user_id, update.content_id],
                )?;
                tx.execute(
                    "UPDATE content SET total_watch_seconds = total_watch_seconds + ?1 WHERE id = ?2",
                    params![added_seconds, update.content_id],
                )?;
            }

            tx.execute(
                "UPDATE watch_logs SET last_viewed = ?1, region = COALESCE(?2, region)
                 WHERE user_id = ?3 AND content_id = ?4",
                params![
                    update.at.naive_utc(),
                    update.region,
                    update.user_id,
                    update.content_id
                ],
            )?;

            let (content_total_watch_seconds, total_plays): (f64, i64) = tx.query_row(
                "SELECT total_watch_seconds, total_plays FROM content WHERE id = ?1",
                [update.content_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let rate = completion_rate(content_total_watch_seconds, duration_seconds, total_plays);
            tx.execute(
                "UPDATE content SET completion_rate = ?1 WHERE id = ?2",
                params![rate, update.content_id],
            )?;

            let log = tx.query_row(
                "SELECT * FROM watch_logs WHERE user_id = ?1 AND content_id = ?2",
                params![update.user_id, update.content_id],
                |row| WatchLog::from_row(row),
            )?;

            Ok(ProgressApplication {
                added_seconds,
                first_view,
                log,
                content_total_watch_seconds,
                total_plays,
                completion_rate: rate,
            })
        })
    }

    pub fn fetch_watch_log(&self, user_id: &str, content_id: i64) -> StoreResult<Option<WatchLog>> {
        let conn = self.open()?;
        let log = conn
            .query_row(
                "SELECT * FROM watch_logs WHERE user_id = ?1 AND content_id = ?2",
                params![user_id, content_id],
                |row| WatchLog::from_row(row),
            )
            .optional()?;
        Ok(log)
    }

    /// Replaces any earlier rating by the same user, then recomputes the
    /// average and count from the full rating set.
    pub fn upsert_rating(&self, user_id: &str, content_id: i64, value: u8) -> StoreResult<(f64, i64)> {
        if !(1..=5).contains(&value) {
            return Err(StoreError::Validation(format!(
                "rating must be between 1 and 5, got {value}"
            )));
        }
        self.write_transaction(|tx| {
            let exists: Option<i64> = tx
                .query_row("SELECT id FROM content WHERE id = ?1", [content_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::not_found("content", content_id));
            }
            tx.execute(
                "INSERT INTO ratings (user_id, content_id, value, rated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, content_id) DO UPDATE SET
                    value = excluded.value,
                    rated_at = excluded.rated_at",
                params![user_id, content_id, value, Utc::now().naive_utc()],
            )?;
            let (average, count) = rating_aggregate(tx, content_id)?;
            tx.execute(
                "UPDATE content SET average_rating = ?1, rating_count = ?2 WHERE id = ?3",
                params![average, count, content_id],
            )?;
            Ok((average, count))
        })
    }

    /// Recomputes every derived analytics column of a content row from its
    /// watch logs and ratings.
    pub fn reconcile_content(&self, content_id: i64) -> StoreResult<Content> {
        self.write_transaction(|tx| {
            let duration_seconds: i64 = tx
                .query_row(
                    "SELECT duration_seconds FROM content WHERE id = ?1",
                    [content_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::not_found("content", content_id))?;
            let (plays, viewers, watch): (i64, i64, f64) = tx.query_row(
                "SELECT COALESCE(SUM(views), 0), COUNT(*), COALESCE(SUM(watch_time_seconds), 0.0)
                 FROM watch_logs WHERE content_id = ?1",
                [content_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let (average, count) = rating_aggregate(tx, content_id)?;
            let rate = completion_rate(watch, duration_seconds, plays);
            tx.execute(
                "UPDATE content SET
                    total_plays = ?1,
                    unique_viewers = ?2,
                    total_watch_seconds = ?3,
                    completion_rate = ?4,
                    average_rating = ?5,
                    rating_count = ?6
                 WHERE id = ?7",
                params![plays, viewers, watch, rate, average, count, content_id],
            )?;
            let content = tx.query_row("SELECT * FROM content WHERE id = ?1", [content_id], |row| {
                Content::from_row(row)
            })?;
            Ok(content)
        })
    }

    pub fn content_analytics_rows(&self) -> StoreResult<Vec<ContentAnalyticsRow>> {
        Ok(self
            .list_content()?
            .into_iter()
            .map(|content| ContentAnalyticsRow {
                content_id: content.id,
                total_watch_minutes: content.total_watch_minutes(),
                title: content.title,
                category: content.category,
                total_plays: content.total_plays,
                unique_viewers: content.unique_viewers,
                average_rating: content.average_rating,
                completion_rate: content.completion_rate,
                release_date: content.release_date,
            })
            .collect())
    }

    pub fn site_totals(&self) -> StoreResult<SiteTotals> {
        let conn = self.open()?;
        let (total_views, unique_viewers, total_watch_seconds): (i64, i64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(views), 0), COUNT(DISTINCT user_id), COALESCE(SUM(watch_time_seconds), 0.0)
             FROM watch_logs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let weighted_duration_seconds: f64 = conn.query_row(
            "SELECT COALESCE(SUM(CAST(duration_seconds AS REAL) * MAX(1, total_plays)), 0.0)
             FROM content WHERE duration_seconds > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(SiteTotals {
            total_views,
            unique_viewers,
            total_watch_seconds,
            weighted_duration_seconds,
        })
    }

    /// Share of watch logs per viewer region, as a percentage of the
    /// returned regions.
    pub fn top_regions(&self, limit: usize) -> StoreResult<Vec<RegionShare>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(NULLIF(TRIM(region), ''), 'Unknown') AS region_name, COUNT(*) AS viewers
             FROM watch_logs
             GROUP BY region_name
             ORDER BY viewers DESC, region_name ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let total: i64 = rows.iter().map(|(_, count)| *count).sum::<i64>().max(1);
        Ok(rows
            .into_iter()
            .map(|(region, viewers)| RegionShare {
                region,
                viewers,
                percent: round2(viewers as f64 / total as f64 * 100.0),
            })
            .collect())
    }

    pub fn session_value(&self, session_id: &str, key: &str) -> StoreResult<Option<String>> {
        let conn = self.open()?;
        let value = conn
            .query_row(
                "SELECT value FROM session_state WHERE session_id = ?1 AND key = ?2",
                params![session_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn purge_sessions(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "DELETE FROM session_state WHERE updated_at < ?1",
            [older_than.naive_utc()],
        )?;
        Ok(affected)
    }
}

fn rating_aggregate(tx: &rusqlite::Transaction<'_>, content_id: i64) -> StoreResult<(f64, i64)> {
    let (average, count): (Option<f64>, i64) = tx.query_row(
        "SELECT AVG(value), COUNT(*) FROM ratings WHERE content_id = ?1",
        [content_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((round2(average.unwrap_or(0.0)), count))
}

fn session_get(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    key: &str,
) -> StoreResult<Option<String>> {
    let value = tx
        .query_row(
            "SELECT value FROM session_state WHERE session_id = ?1 AND key = ?2",
            params![session_id, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn session_put(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    key: &str,
    value: &str,
) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO session_state (session_id, key, value, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![session_id, key, value, Utc::now().naive_utc()],
    )?;
    Ok(())
}
