//! SQLite-backed activity persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use pacer_core::ActivityStore;
use pacer_domain::{ActivitySummary, PacerError, Result, UpsertOutcome};

use super::manager::DbManager;

/// Persists activity rows and per-athlete sync cursors.
///
/// All SQLite work runs on the blocking thread pool; the async trait methods
/// only marshal parameters in and results out.
#[derive(Clone)]
pub struct SqliteActivityStore {
    db: Arc<DbManager>,
}

impl SqliteActivityStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Number of stored activities for one athlete.
    pub async fn count_for_athlete(&self, athlete_id: i64) -> Result<i64> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.query_row(
                "SELECT COUNT(*) FROM activities WHERE athlete_id = ?1",
                params![athlete_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn upsert(&self, athlete_id: i64, activity: &ActivitySummary) -> Result<UpsertOutcome> {
        let db = Arc::clone(&self.db);
        let activity = activity.clone();
        run_blocking(move || {
            let conn = db.get_connection()?;

            let existed: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM activities WHERE id = ?1)",
                    params![activity.id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let raw_json = serde_json::to_string(&activity.raw)
                .map_err(|e| PacerError::Internal(format!("raw payload serialization: {e}")))?;
            let now = rfc3339(Utc::now());

            conn.execute(
                "INSERT INTO activities (
                     id, athlete_id, sport_type, activity_type, start_date,
                     distance, moving_time, elapsed_time,
                     average_heartrate, max_heartrate, total_elevation_gain,
                     raw_json, synced_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                     athlete_id = excluded.athlete_id,
                     sport_type = excluded.sport_type,
                     activity_type = excluded.activity_type,
                     start_date = excluded.start_date,
                     distance = excluded.distance,
                     moving_time = excluded.moving_time,
                     elapsed_time = excluded.elapsed_time,
                     average_heartrate = excluded.average_heartrate,
                     max_heartrate = excluded.max_heartrate,
                     total_elevation_gain = excluded.total_elevation_gain,
                     raw_json = excluded.raw_json,
                     synced_at = excluded.synced_at",
                params![
                    activity.id,
                    athlete_id,
                    activity.sport_type,
                    activity.activity_type,
                    rfc3339(activity.start_date),
                    activity.distance,
                    activity.moving_time,
                    activity.elapsed_time,
                    activity.average_heartrate,
                    activity.max_heartrate,
                    activity.total_elevation_gain,
                    raw_json,
                    now,
                ],
            )
            .map_err(db_err)?;

            debug!(activity_id = activity.id, athlete_id, was_new = !existed, "activity upserted");
            Ok(UpsertOutcome { was_new: !existed })
        })
        .await
    }

    async fn last_sync_cursor(&self, athlete_id: i64) -> Result<Option<DateTime<Utc>>> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            let stored: Option<String> = conn
                .query_row(
                    "SELECT last_activity_start FROM sync_state WHERE athlete_id = ?1",
                    params![athlete_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            stored.map(|s| parse_rfc3339(&s)).transpose()
        })
        .await
    }

    async fn set_last_sync_cursor(&self, athlete_id: i64, cursor: DateTime<Utc>) -> Result<()> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO sync_state (athlete_id, last_activity_start, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(athlete_id) DO UPDATE SET
                     last_activity_start = excluded.last_activity_start,
                     updated_at = excluded.updated_at",
                params![athlete_id, rfc3339(cursor), rfc3339(Utc::now())],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }
}

pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PacerError::Internal(format!("blocking task failed: {e}")))?
}

pub(crate) fn db_err(e: rusqlite::Error) -> PacerError {
    PacerError::Database(e.to_string())
}

pub(crate) fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PacerError::Database(format!("invalid stored timestamp {s:?}: {e}")))
}
