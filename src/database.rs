use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PersistenceError, RehabError, Result};
use crate::metrics::{decode_samples_or_empty, encode_samples};
use crate::models::{ClinicalProfile, Demographics, Exercise, UserProfile, WorkoutRecommendation};
use crate::store::{check_recommendation, checked_user, ExerciseQuery, RehabStore};

const EXERCISE_COLUMNS: &str = "id, user_id, started_at, duration_seconds, total_distance_meters, \
     avg_velocity_ms, max_velocity_ms, min_velocity_ms, avg_acceleration_ms2, samples";

const USER_COLUMNS: &str = "id, name, age, gender, sci_cause, sci_level, sci_category, \
     sci_severity, sci_class, is_admin, is_active";

const RECOMMENDATION_COLUMNS: &str = "id, user_id, target_velocity_ms, work_seconds, rest_seconds, \
     repetitions, notes, confidence_percent, generated_by_ai, manually_adjusted, adjusted_by_admin, \
     active, updated_at";

/// SQLite-backed [`RehabStore`]
pub struct SqliteStore {
    conn: Connection,
}

/// Label a sqlite failure with the store operation that hit it
fn failed(operation: &'static str) -> impl Fn(rusqlite::Error) -> RehabError {
    move |err| {
        let err = match PersistenceError::from(err) {
            PersistenceError::QueryFailed { reason, .. } => PersistenceError::QueryFailed {
                operation: operation.to_string(),
                reason,
            },
            PersistenceError::Busy { .. } => PersistenceError::Busy {
                operation: operation.to_string(),
            },
            other => other,
        };
        RehabError::Persistence(err)
    }
}

fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn time_column(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

impl SqliteStore {
    /// Create or open a store at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).map_err(|e| PersistenceError::ConnectionFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;

        let store = Self::with_connection(conn, busy_timeout)?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| PersistenceError::ConnectionFailed {
            reason: e.to_string(),
        })?;
        Self::with_connection(conn, Duration::from_millis(0))
    }

    fn with_connection(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout).map_err(failed("busy_timeout"))?;
        let store = Self { conn };
        store.init_schema().map_err(failed("init_schema"))?;
        Ok(store)
    }

    /// Initialize tables and indexes
    fn init_schema(&self) -> rusqlite::Result<()> {
        // journal_mode returns a row, so it cannot go through execute_batch
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "SQLite journal mode");

        self.conn.execute_batch(
            r#"
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                age INTEGER,
                gender TEXT,
                sci_cause TEXT,
                sci_level TEXT,
                sci_category TEXT,
                sci_severity TEXT,
                sci_class TEXT,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS exercises (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                total_distance_meters REAL NOT NULL DEFAULT 0,
                avg_velocity_ms REAL NOT NULL DEFAULT 0,
                max_velocity_ms REAL NOT NULL DEFAULT 0,
                min_velocity_ms REAL NOT NULL DEFAULT 0,
                avg_acceleration_ms2 REAL NOT NULL DEFAULT 0,
                -- JSON array of {"timestamp", "velocity"} readings
                samples TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS recommendations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                target_velocity_ms REAL NOT NULL,
                work_seconds INTEGER NOT NULL,
                rest_seconds INTEGER NOT NULL,
                repetitions INTEGER NOT NULL,
                notes TEXT,
                confidence_percent INTEGER NOT NULL CHECK (confidence_percent BETWEEN 0 AND 100),
                generated_by_ai BOOLEAN NOT NULL,
                manually_adjusted BOOLEAN NOT NULL,
                adjusted_by_admin BOOLEAN NOT NULL,
                active BOOLEAN NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exercises_user_started
                ON exercises (user_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_recommendations_user
                ON recommendations (user_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recommendations_one_active
                ON recommendations (user_id) WHERE active = 1;
            "#,
        )
    }

    fn exercise_from_row(row: &Row) -> rusqlite::Result<Exercise> {
        let payload: String = row.get("samples")?;
        Ok(Exercise {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            started_at: time_column(row, "started_at")?,
            duration_seconds: row.get("duration_seconds")?,
            total_distance_meters: row.get("total_distance_meters")?,
            avg_velocity_ms: row.get("avg_velocity_ms")?,
            max_velocity_ms: row.get("max_velocity_ms")?,
            min_velocity_ms: row.get("min_velocity_ms")?,
            avg_acceleration_ms2: row.get("avg_acceleration_ms2")?,
            samples: decode_samples_or_empty(&payload),
        })
    }

    fn user_from_row(row: &Row) -> rusqlite::Result<UserProfile> {
        Ok(UserProfile {
            id: row.get("id")?,
            name: row.get("name")?,
            demographic: Demographics {
                age: row.get("age")?,
                gender: row.get("gender")?,
            },
            clinical: ClinicalProfile {
                sci_cause: row.get("sci_cause")?,
                sci_level: row.get("sci_level")?,
                sci_category: row.get("sci_category")?,
                sci_severity: row.get("sci_severity")?,
                sci_class: row.get("sci_class")?,
            },
            is_admin: row.get("is_admin")?,
            is_active: row.get("is_active")?,
        })
    }

    fn recommendation_from_row(row: &Row) -> rusqlite::Result<WorkoutRecommendation> {
        Ok(WorkoutRecommendation {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            target_velocity_ms: row.get("target_velocity_ms")?,
            work_seconds: row.get("work_seconds")?,
            rest_seconds: row.get("rest_seconds")?,
            repetitions: row.get("repetitions")?,
            notes: row.get("notes")?,
            confidence_percent: row.get("confidence_percent")?,
            generated_by_ai: row.get("generated_by_ai")?,
            manually_adjusted: row.get("manually_adjusted")?,
            adjusted_by_admin: row.get("adjusted_by_admin")?,
            active: row.get("active")?,
            updated_at: time_column(row, "updated_at")?,
        })
    }

    /// Rows that violate user invariants are reported, not silently dropped
    fn validated_user(user: UserProfile) -> Result<UserProfile> {
        let user = user.normalized();
        user.validate().map_err(|reason| PersistenceError::InvalidRecord {
            table: "users".to_string(),
            reason,
        })?;
        Ok(user)
    }

    fn query_exercises(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<Vec<Exercise>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::exercise_from_row)?;
        rows.collect()
    }

    fn insert_recommendation_row(conn: &Connection, rec: &WorkoutRecommendation) -> rusqlite::Result<usize> {
        conn.execute(
            &format!(
                "INSERT INTO recommendations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                RECOMMENDATION_COLUMNS
            ),
            params![
                rec.id,
                rec.user_id,
                rec.target_velocity_ms,
                rec.work_seconds,
                rec.rest_seconds,
                rec.repetitions,
                rec.notes,
                rec.confidence_percent,
                rec.generated_by_ai,
                rec.manually_adjusted,
                rec.adjusted_by_admin,
                rec.active,
                to_db_time(rec.updated_at),
            ],
        )
    }

    fn deactivate_rows(conn: &Connection, user_id: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE recommendations SET active = 0 WHERE user_id = ?1 AND active = 1",
            params![user_id],
        )
    }
}

impl RehabStore for SqliteStore {
    fn exercises_for_user(&self, user_id: &str, query: &ExerciseQuery) -> Result<Vec<Exercise>> {
        let limit = query
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        self.query_exercises(
            &format!(
                "SELECT {} FROM exercises WHERE user_id = ?1 AND (?2 IS NULL OR started_at >= ?2) \
                 ORDER BY started_at DESC LIMIT ?3",
                EXERCISE_COLUMNS
            ),
            params![user_id, query.since.map(to_db_time), limit],
        )
        .map_err(failed("exercises_for_user"))
    }

    fn first_exercise(&self, user_id: &str) -> Result<Option<Exercise>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM exercises WHERE user_id = ?1 ORDER BY started_at ASC LIMIT 1",
                    EXERCISE_COLUMNS
                ),
                params![user_id],
                Self::exercise_from_row,
            )
            .optional()
            .map_err(failed("first_exercise"))
    }

    fn peer_exercise_sample(&self, excluded_user_id: &str, limit: usize) -> Result<Vec<Exercise>> {
        let columns = EXERCISE_COLUMNS
            .split(", ")
            .map(|c| format!("e.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_exercises(
            &format!(
                "SELECT {} FROM exercises e LEFT JOIN users u ON u.id = e.user_id \
                 WHERE e.user_id != ?1 AND e.duration_seconds > 0 AND COALESCE(u.is_admin, 0) = 0 \
                 ORDER BY e.started_at DESC LIMIT ?2",
                columns
            ),
            params![excluded_user_id, i64::try_from(limit).unwrap_or(i64::MAX)],
        )
        .map_err(failed("peer_exercise_sample"))
    }

    fn insert_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO exercises ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    EXERCISE_COLUMNS
                ),
                params![
                    exercise.id,
                    exercise.user_id,
                    to_db_time(exercise.started_at),
                    exercise.duration_seconds,
                    exercise.total_distance_meters,
                    exercise.avg_velocity_ms,
                    exercise.max_velocity_ms,
                    exercise.min_velocity_ms,
                    exercise.avg_acceleration_ms2,
                    encode_samples(&exercise.samples),
                ],
            )
            .map_err(failed("insert_exercise"))?;
        Ok(())
    }

    fn update_exercise(&mut self, exercise: &Exercise) -> Result<()> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE exercises SET
                    duration_seconds = ?2, total_distance_meters = ?3, avg_velocity_ms = ?4,
                    max_velocity_ms = ?5, min_velocity_ms = ?6, avg_acceleration_ms2 = ?7, samples = ?8
                WHERE id = ?1
                "#,
                params![
                    exercise.id,
                    exercise.duration_seconds,
                    exercise.total_distance_meters,
                    exercise.avg_velocity_ms,
                    exercise.max_velocity_ms,
                    exercise.min_velocity_ms,
                    exercise.avg_acceleration_ms2,
                    encode_samples(&exercise.samples),
                ],
            )
            .map_err(failed("update_exercise"))?;

        if changed == 0 {
            return Err(PersistenceError::NotFound {
                table: "exercises".to_string(),
                id: exercise.id.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn delete_exercises_for_user(&mut self, user_id: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM exercises WHERE user_id = ?1", params![user_id])
            .map_err(failed("delete_exercises_for_user"))
    }

    fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                Self::user_from_row,
            )
            .optional()
            .map_err(failed("get_user"))?;

        user.map(Self::validated_user).transpose()
    }

    fn non_admin_users(&self) -> Result<Vec<UserProfile>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE is_admin = 0 ORDER BY id",
                USER_COLUMNS
            ))
            .map_err(failed("non_admin_users"))?;
        let users = stmt
            .query_map([], Self::user_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(failed("non_admin_users"))?;

        users.into_iter().map(Self::validated_user).collect()
    }

    fn upsert_user(&mut self, user: &UserProfile) -> Result<()> {
        let user = checked_user(user)?;
        self.conn
            .execute(
                r#"
                INSERT INTO users (
                    id, name, age, gender, sci_cause, sci_level, sci_category,
                    sci_severity, sci_class, is_admin, is_active, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, age = excluded.age, gender = excluded.gender,
                    sci_cause = excluded.sci_cause, sci_level = excluded.sci_level,
                    sci_category = excluded.sci_category, sci_severity = excluded.sci_severity,
                    sci_class = excluded.sci_class, is_admin = excluded.is_admin,
                    is_active = excluded.is_active, updated_at = CURRENT_TIMESTAMP
                "#,
                params![
                    user.id,
                    user.name,
                    user.demographic.age,
                    user.demographic.gender,
                    user.clinical.sci_cause,
                    user.clinical.sci_level,
                    user.clinical.sci_category,
                    user.clinical.sci_severity,
                    user.clinical.sci_class,
                    user.is_admin,
                    user.is_active,
                ],
            )
            .map_err(failed("upsert_user"))?;
        Ok(())
    }

    fn active_recommendation(&self, user_id: &str) -> Result<Option<WorkoutRecommendation>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM recommendations WHERE user_id = ?1 AND active = 1 \
                     ORDER BY updated_at DESC LIMIT 1",
                    RECOMMENDATION_COLUMNS
                ),
                params![user_id],
                Self::recommendation_from_row,
            )
            .optional()
            .map_err(failed("active_recommendation"))
    }

    fn get_recommendation(&self, recommendation_id: &str) -> Result<Option<WorkoutRecommendation>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM recommendations WHERE id = ?1", RECOMMENDATION_COLUMNS),
                params![recommendation_id],
                Self::recommendation_from_row,
            )
            .optional()
            .map_err(failed("get_recommendation"))
    }

    fn insert_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        check_recommendation(recommendation)?;
        Self::insert_recommendation_row(&self.conn, recommendation)
            .map_err(failed("insert_recommendation"))?;
        Ok(())
    }

    fn update_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        check_recommendation(recommendation)?;
        let rec = recommendation;
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE recommendations SET
                    target_velocity_ms = ?2, work_seconds = ?3, rest_seconds = ?4, repetitions = ?5,
                    notes = ?6, confidence_percent = ?7, generated_by_ai = ?8, manually_adjusted = ?9,
                    adjusted_by_admin = ?10, active = ?11, updated_at = ?12
                WHERE id = ?1
                "#,
                params![
                    rec.id,
                    rec.target_velocity_ms,
                    rec.work_seconds,
                    rec.rest_seconds,
                    rec.repetitions,
                    rec.notes,
                    rec.confidence_percent,
                    rec.generated_by_ai,
                    rec.manually_adjusted,
                    rec.adjusted_by_admin,
                    rec.active,
                    to_db_time(rec.updated_at),
                ],
            )
            .map_err(failed("update_recommendation"))?;

        if changed == 0 {
            return Err(PersistenceError::NotFound {
                table: "recommendations".to_string(),
                id: rec.id.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn deactivate_recommendations(&mut self, user_id: &str) -> Result<usize> {
        Self::deactivate_rows(&self.conn, user_id).map_err(failed("deactivate_recommendations"))
    }

    /// Deactivate and insert in one immediate transaction
    ///
    /// A failed insert rolls the deactivation back, and the partial unique
    /// index rejects a second concurrent writer instead of leaving two
    /// active rows.
    fn replace_active_recommendation(&mut self, recommendation: &WorkoutRecommendation) -> Result<()> {
        check_recommendation(recommendation)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(failed("replace_active_recommendation"))?;

        let deactivated = Self::deactivate_rows(&tx, &recommendation.user_id)
            .map_err(failed("replace_active_recommendation"))?;
        Self::insert_recommendation_row(&tx, recommendation)
            .map_err(failed("replace_active_recommendation"))?;
        tx.commit().map_err(failed("replace_active_recommendation"))?;

        debug!(
            user_id = %recommendation.user_id,
            deactivated,
            "Replaced active recommendation"
        );
        Ok(())
    }
}
