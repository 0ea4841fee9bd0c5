//! SQLite implementation of `EntityRepository`.
//!
//! Provides durable storage that survives service restarts. Entities live in
//! explicit relational columns; the audit log and external badge fields are
//! JSON-encoded TEXT columns, since their shape is open-ended.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track schema
//! versions. When the schema changes, increment `SCHEMA_VERSION` and add a
//! migration function in `run_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use proctor_core::{
    Assertion, AssertionId, Assessment, AssessmentId, AuditLog, Badge, CommitSha, EntityKind,
    EntryId, NewAssertion, NewAssessment, NewTrackerEntry, NewUser, Reviewer, ReviewerId,
    TrackerEntry, TrackerStatus, User, UserId,
};

use super::{EntityRepository, RepositoryError};

/// Current schema version. Increment when making schema changes.
///
/// When adding a new version:
/// 1. Increment this constant
/// 2. Add a migration function `migrate_v{N}_to_v{N+1}`
/// 3. Call it from `run_migrations`
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed entity repository.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`.
/// All operations run under `tokio::task::spawn_blocking` so the async
/// runtime is never blocked on database work, and the mutex serializes
/// access so each operation executes as one unit against the store.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open or create the database file at the given path.
    ///
    /// The connection is configured with WAL journaling (verified, since
    /// SQLite can silently refuse it on some filesystems), a busy timeout,
    /// and enforced foreign keys.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;
        Self::configure(conn, false)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RepositoryError::storage("open in-memory database", e.to_string()))?;
        Self::configure(conn, true)
    }

    fn configure(conn: Connection, is_in_memory: bool) -> Result<Self, RepositoryError> {
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        // In-memory databases report "memory", which is fine: they are
        // ephemeral by design. Anything else must actually be WAL.
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    /// Initialize the database schema and run any pending migrations.
    fn init_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().expect("connection mutex poisoned");

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| RepositoryError::storage("read user_version", e.to_string()))?;

        if current_version > SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "database schema version {} is newer than supported version {}; \
                     please upgrade the application",
                    current_version, SCHEMA_VERSION
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(&conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| RepositoryError::storage("set user_version", e.to_string()))?;
        }

        Ok(())
    }

    /// Run migrations from `from_version` up to `SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), RepositoryError> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }

        // Future migrations go here:
        // if from_version < 2 {
        //     Self::migrate_v1_to_v2(conn)?;
        // }

        Ok(())
    }

    /// Migration v0 -> v1: Create initial schema.
    fn migrate_v0_to_v1(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS reviewers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_reviewers_user ON reviewers(user_id);

            CREATE TABLE IF NOT EXISTS assessments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                goals TEXT NOT NULL,
                change_log TEXT NOT NULL,
                prerequisites TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracker_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                assessment_id INTEGER NOT NULL REFERENCES assessments(id),
                reviewer_id INTEGER REFERENCES reviewers(id),
                status TEXT NOT NULL CHECK(status IN (
                    'Initiated', 'Under review', 'Approved'
                )),
                latest_commit TEXT NOT NULL UNIQUE,
                last_updated TEXT NOT NULL,
                log TEXT NOT NULL,
                UNIQUE (user_id, assessment_id)
            );

            CREATE TABLE IF NOT EXISTS badges (
                entity_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                fields TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assertions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                assessment_tracker_id INTEGER NOT NULL REFERENCES tracker_entries(id),
                badge_name TEXT NOT NULL,
                fields TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assertions_entry
                ON assertions(assessment_tracker_id);
            "#,
        )
        .map_err(|e| RepositoryError::storage("migration v0 -> v1", e.to_string()))?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("connection mutex poisoned");
            f(&mut *conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(op, e.to_string()))?
    }
}

// =============================================================================
// Row conversions
// =============================================================================

struct EntryRow {
    id: i64,
    user_id: i64,
    assessment_id: i64,
    reviewer_id: Option<i64>,
    status: String,
    latest_commit: String,
    last_updated: String,
    log: String,
}

const ENTRY_COLUMNS: &str =
    "id, user_id, assessment_id, reviewer_id, status, latest_commit, last_updated, log";

fn entry_from_row(row: EntryRow) -> Result<TrackerEntry, RepositoryError> {
    let status = TrackerStatus::parse(&row.status)
        .ok_or_else(|| RepositoryError::corruption(format!("unknown status '{}'", row.status)))?;
    let last_updated = parse_stored_timestamp(&row.last_updated)?;
    let log: AuditLog = serde_json::from_str(&row.log)
        .map_err(|e| RepositoryError::corruption(format!("tracker entry log JSON: {}", e)))?;

    Ok(TrackerEntry {
        id: EntryId(row.id),
        user_id: UserId(row.user_id),
        assessment_id: AssessmentId(row.assessment_id),
        reviewer_id: row.reviewer_id.map(ReviewerId),
        status,
        latest_commit: CommitSha(row.latest_commit),
        last_updated,
        log,
    })
}

fn parse_stored_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::corruption(format!("timestamp '{}': {}", value, e)))
}

fn query_entry(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<TrackerEntry>, RepositoryError> {
    let row = conn
        .query_row(sql, params, |row| {
            Ok(EntryRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                assessment_id: row.get(2)?,
                reviewer_id: row.get(3)?,
                status: row.get(4)?,
                latest_commit: row.get(5)?,
                last_updated: row.get(6)?,
                log: row.get(7)?,
            })
        })
        .optional()
        .map_err(|e| RepositoryError::storage("tracker entry lookup", e.to_string()))?;

    row.map(entry_from_row).transpose()
}

fn assessment_from_row(
    id: i64,
    name: String,
    version: String,
    description: String,
    goals: String,
    change_log: String,
    prerequisites: String,
) -> Result<Assessment, RepositoryError> {
    let change_log: serde_json::Value = serde_json::from_str(&change_log)
        .map_err(|e| RepositoryError::corruption(format!("assessment change_log JSON: {}", e)))?;
    let prerequisites: Vec<AssessmentId> = serde_json::from_str(&prerequisites)
        .map_err(|e| RepositoryError::corruption(format!("assessment prerequisites JSON: {}", e)))?;
    Ok(Assessment {
        id: AssessmentId(id),
        name,
        version,
        description,
        goals,
        change_log,
        prerequisites,
    })
}

fn query_assessment(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<Assessment>, RepositoryError> {
    let row = conn
        .query_row(sql, params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .optional()
        .map_err(|e| RepositoryError::storage("assessment lookup", e.to_string()))?;

    row.map(|(id, name, version, description, goals, change_log, prerequisites)| {
        assessment_from_row(id, name, version, description, goals, change_log, prerequisites)
    })
    .transpose()
}

fn query_user(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<User>, RepositoryError> {
    conn.query_row(sql, params, |row| {
        Ok(User {
            id: UserId(row.get(0)?),
            username: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            email: row.get(4)?,
        })
    })
    .optional()
    .map_err(|e| RepositoryError::storage("user lookup", e.to_string()))
}

fn badge_from_row(entity_id: String, name: String, fields: String) -> Result<Badge, RepositoryError> {
    let fields = serde_json::from_str(&fields)
        .map_err(|e| RepositoryError::corruption(format!("badge fields JSON: {}", e)))?;
    Ok(Badge {
        entity_id,
        name,
        fields,
    })
}

// =============================================================================
// EntityRepository implementation
// =============================================================================

#[async_trait]
impl EntityRepository for SqliteRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        self.with_conn("create_user", move |conn| {
            let username_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    params![user.username],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_user", e.to_string()))?;
            if username_taken.is_some() {
                return Err(RepositoryError::conflict(EntityKind::User, &user.username));
            }

            let email_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE email = ?1",
                    params![user.email],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_user", e.to_string()))?;
            if email_taken.is_some() {
                return Err(RepositoryError::conflict(EntityKind::User, &user.email));
            }

            conn.execute(
                "INSERT INTO users (username, first_name, last_name, email)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user.username, user.first_name, user.last_name, user.email],
            )
            .map_err(|e| RepositoryError::storage("create_user", e.to_string()))?;

            Ok(User {
                id: UserId(conn.last_insert_rowid()),
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                email: user.email,
            })
        })
        .await
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.with_conn("user_by_id", move |conn| {
            query_user(
                conn,
                "SELECT id, username, first_name, last_name, email FROM users WHERE id = ?1",
                &[&id.0],
            )
        })
        .await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let username = username.to_string();
        self.with_conn("user_by_username", move |conn| {
            query_user(
                conn,
                "SELECT id, username, first_name, last_name, email FROM users WHERE username = ?1",
                &[&username],
            )
        })
        .await
    }

    async fn create_reviewer(&self, user_id: UserId) -> Result<Reviewer, RepositoryError> {
        self.with_conn("create_reviewer", move |conn| {
            conn.execute(
                "INSERT INTO reviewers (user_id) VALUES (?1)",
                params![user_id.0],
            )
            .map_err(|e| RepositoryError::storage("create_reviewer", e.to_string()))?;
            Ok(Reviewer {
                id: ReviewerId(conn.last_insert_rowid()),
                user_id,
            })
        })
        .await
    }

    async fn reviewer_by_id(&self, id: ReviewerId) -> Result<Option<Reviewer>, RepositoryError> {
        self.with_conn("reviewer_by_id", move |conn| {
            conn.query_row(
                "SELECT id, user_id FROM reviewers WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Reviewer {
                        id: ReviewerId(row.get(0)?),
                        user_id: UserId(row.get(1)?),
                    })
                },
            )
            .optional()
            .map_err(|e| RepositoryError::storage("reviewer_by_id", e.to_string()))
        })
        .await
    }

    async fn reviewer_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        self.with_conn("reviewer_by_user", move |conn| {
            conn.query_row(
                "SELECT id, user_id FROM reviewers WHERE user_id = ?1",
                params![user_id.0],
                |row| {
                    Ok(Reviewer {
                        id: ReviewerId(row.get(0)?),
                        user_id: UserId(row.get(1)?),
                    })
                },
            )
            .optional()
            .map_err(|e| RepositoryError::storage("reviewer_by_user", e.to_string()))
        })
        .await
    }

    async fn reviewer_ids_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReviewerId>, RepositoryError> {
        self.with_conn("reviewer_ids_for_user", move |conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM reviewers WHERE user_id = ?1 ORDER BY id")
                .map_err(|e| RepositoryError::storage("reviewer_ids_for_user", e.to_string()))?;
            let ids = stmt
                .query_map(params![user_id.0], |row| row.get::<_, i64>(0))
                .map_err(|e| RepositoryError::storage("reviewer_ids_for_user", e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RepositoryError::storage("reviewer_ids_for_user", e.to_string()))?;
            Ok(ids.into_iter().map(ReviewerId).collect())
        })
        .await
    }

    async fn all_reviewer_ids(&self) -> Result<Vec<ReviewerId>, RepositoryError> {
        self.with_conn("all_reviewer_ids", move |conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM reviewers ORDER BY id")
                .map_err(|e| RepositoryError::storage("all_reviewer_ids", e.to_string()))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))
                .map_err(|e| RepositoryError::storage("all_reviewer_ids", e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RepositoryError::storage("all_reviewer_ids", e.to_string()))?;
            Ok(ids.into_iter().map(ReviewerId).collect())
        })
        .await
    }

    async fn create_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<Assessment, RepositoryError> {
        self.with_conn("create_assessment", move |conn| {
            let name_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM assessments WHERE name = ?1",
                    params![assessment.name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_assessment", e.to_string()))?;
            if name_taken.is_some() {
                return Err(RepositoryError::conflict(
                    EntityKind::Assessment,
                    &assessment.name,
                ));
            }

            let change_log = serde_json::to_string(&assessment.change_log)
                .map_err(|e| RepositoryError::storage("create_assessment", e.to_string()))?;
            let prerequisites = serde_json::to_string(&assessment.prerequisites)
                .map_err(|e| RepositoryError::storage("create_assessment", e.to_string()))?;

            conn.execute(
                "INSERT INTO assessments (name, version, description, goals, change_log, prerequisites)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    assessment.name,
                    assessment.version,
                    assessment.description,
                    assessment.goals,
                    change_log,
                    prerequisites,
                ],
            )
            .map_err(|e| RepositoryError::storage("create_assessment", e.to_string()))?;

            Ok(Assessment {
                id: AssessmentId(conn.last_insert_rowid()),
                name: assessment.name,
                version: assessment.version,
                description: assessment.description,
                goals: assessment.goals,
                change_log: assessment.change_log,
                prerequisites: assessment.prerequisites,
            })
        })
        .await
    }

    async fn assessment_by_id(
        &self,
        id: AssessmentId,
    ) -> Result<Option<Assessment>, RepositoryError> {
        self.with_conn("assessment_by_id", move |conn| {
            query_assessment(
                conn,
                "SELECT id, name, version, description, goals, change_log, prerequisites
                 FROM assessments WHERE id = ?1",
                &[&id.0],
            )
        })
        .await
    }

    async fn assessment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Assessment>, RepositoryError> {
        let name = name.to_string();
        self.with_conn("assessment_by_name", move |conn| {
            query_assessment(
                conn,
                "SELECT id, name, version, description, goals, change_log, prerequisites
                 FROM assessments WHERE name = ?1",
                &[&name],
            )
        })
        .await
    }

    async fn create_tracker_entry(
        &self,
        entry: NewTrackerEntry,
    ) -> Result<TrackerEntry, RepositoryError> {
        self.with_conn("create_tracker_entry", move |conn| {
            let pair_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM tracker_entries WHERE user_id = ?1 AND assessment_id = ?2",
                    params![entry.user_id.0, entry.assessment_id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_tracker_entry", e.to_string()))?;
            if pair_taken.is_some() {
                return Err(RepositoryError::conflict(
                    EntityKind::TrackerEntry,
                    format!(
                        "user {} / assessment {}",
                        entry.user_id, entry.assessment_id
                    ),
                ));
            }

            let commit_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM tracker_entries WHERE latest_commit = ?1",
                    params![entry.latest_commit.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_tracker_entry", e.to_string()))?;
            if commit_taken.is_some() {
                return Err(RepositoryError::conflict(
                    EntityKind::TrackerEntry,
                    entry.latest_commit.0.clone(),
                ));
            }

            let log = serde_json::to_string(&entry.log)
                .map_err(|e| RepositoryError::storage("create_tracker_entry", e.to_string()))?;

            conn.execute(
                "INSERT INTO tracker_entries
                     (user_id, assessment_id, reviewer_id, status, latest_commit, last_updated, log)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6)",
                params![
                    entry.user_id.0,
                    entry.assessment_id.0,
                    entry.status.as_str(),
                    entry.latest_commit.0,
                    entry.last_updated.to_rfc3339(),
                    log,
                ],
            )
            .map_err(|e| RepositoryError::storage("create_tracker_entry", e.to_string()))?;

            Ok(TrackerEntry {
                id: EntryId(conn.last_insert_rowid()),
                user_id: entry.user_id,
                assessment_id: entry.assessment_id,
                reviewer_id: None,
                status: entry.status,
                latest_commit: entry.latest_commit,
                last_updated: entry.last_updated,
                log: entry.log,
            })
        })
        .await
    }

    async fn tracker_entry_for(
        &self,
        user_id: UserId,
        assessment_id: AssessmentId,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        self.with_conn("tracker_entry_for", move |conn| {
            query_entry(
                conn,
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM tracker_entries
                     WHERE user_id = ?1 AND assessment_id = ?2"
                ),
                &[&user_id.0, &assessment_id.0],
            )
        })
        .await
    }

    async fn tracker_entry_by_id(
        &self,
        id: EntryId,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        self.with_conn("tracker_entry_by_id", move |conn| {
            query_entry(
                conn,
                &format!("SELECT {ENTRY_COLUMNS} FROM tracker_entries WHERE id = ?1"),
                &[&id.0],
            )
        })
        .await
    }

    async fn tracker_entry_by_commit(
        &self,
        commit: &CommitSha,
    ) -> Result<Option<TrackerEntry>, RepositoryError> {
        let commit = commit.0.clone();
        self.with_conn("tracker_entry_by_commit", move |conn| {
            query_entry(
                conn,
                &format!("SELECT {ENTRY_COLUMNS} FROM tracker_entries WHERE latest_commit = ?1"),
                &[&commit],
            )
        })
        .await
    }

    async fn update_tracker_entry(&self, entry: &TrackerEntry) -> Result<(), RepositoryError> {
        let entry = entry.clone();
        self.with_conn("update_tracker_entry", move |conn| {
            let commit_taken: Option<i64> = conn
                .query_row(
                    "SELECT id FROM tracker_entries WHERE latest_commit = ?1 AND id != ?2",
                    params![entry.latest_commit.0, entry.id.0],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("update_tracker_entry", e.to_string()))?;
            if commit_taken.is_some() {
                return Err(RepositoryError::conflict(
                    EntityKind::TrackerEntry,
                    entry.latest_commit.0.clone(),
                ));
            }

            let log = serde_json::to_string(&entry.log)
                .map_err(|e| RepositoryError::storage("update_tracker_entry", e.to_string()))?;

            let rows = conn
                .execute(
                    "UPDATE tracker_entries
                     SET reviewer_id = ?1, status = ?2, latest_commit = ?3,
                         last_updated = ?4, log = ?5
                     WHERE id = ?6",
                    params![
                        entry.reviewer_id.map(|r| r.0),
                        entry.status.as_str(),
                        entry.latest_commit.0,
                        entry.last_updated.to_rfc3339(),
                        log,
                        entry.id.0,
                    ],
                )
                .map_err(|e| RepositoryError::storage("update_tracker_entry", e.to_string()))?;

            if rows == 0 {
                return Err(RepositoryError::corruption(format!(
                    "tracker entry {} vanished during update",
                    entry.id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn upsert_badges(&self, badges: Vec<Badge>) -> Result<(), RepositoryError> {
        self.with_conn("upsert_badges", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("upsert_badges", e.to_string()))?;

            for badge in &badges {
                let fields = serde_json::to_string(&badge.fields)
                    .map_err(|e| RepositoryError::storage("upsert_badges", e.to_string()))?;
                tx.execute(
                    "INSERT INTO badges (entity_id, name, fields)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (entity_id)
                     DO UPDATE SET name = excluded.name, fields = excluded.fields",
                    params![badge.entity_id, badge.name, fields],
                )
                .map_err(|e| RepositoryError::storage("upsert_badges", e.to_string()))?;
            }

            tx.commit()
                .map_err(|e| RepositoryError::storage("upsert_badges", e.to_string()))
        })
        .await
    }

    async fn badge_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<Badge>, RepositoryError> {
        let entity_id = entity_id.to_string();
        self.with_conn("badge_by_entity_id", move |conn| {
            let row = conn
                .query_row(
                    "SELECT entity_id, name, fields FROM badges WHERE entity_id = ?1",
                    params![entity_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| RepositoryError::storage("badge_by_entity_id", e.to_string()))?;
            row.map(|(entity_id, name, fields)| badge_from_row(entity_id, name, fields))
                .transpose()
        })
        .await
    }

    async fn all_badges(&self) -> Result<Vec<Badge>, RepositoryError> {
        self.with_conn("all_badges", move |conn| {
            let mut stmt = conn
                .prepare("SELECT entity_id, name, fields FROM badges ORDER BY entity_id")
                .map_err(|e| RepositoryError::storage("all_badges", e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("all_badges", e.to_string()))?;

            let mut badges = Vec::new();
            for row in rows {
                let (entity_id, name, fields) =
                    row.map_err(|e| RepositoryError::storage("all_badges row", e.to_string()))?;
                badges.push(badge_from_row(entity_id, name, fields)?);
            }
            Ok(badges)
        })
        .await
    }

    async fn insert_assertion(
        &self,
        assertion: NewAssertion,
    ) -> Result<Assertion, RepositoryError> {
        self.with_conn("insert_assertion", move |conn| {
            let fields = serde_json::to_string(&assertion.fields)
                .map_err(|e| RepositoryError::storage("insert_assertion", e.to_string()))?;

            conn.execute(
                "INSERT INTO assertions (assessment_tracker_id, badge_name, fields)
                 VALUES (?1, ?2, ?3)",
                params![
                    assertion.assessment_tracker_id.0,
                    assertion.badge_name,
                    fields,
                ],
            )
            .map_err(|e| RepositoryError::storage("insert_assertion", e.to_string()))?;

            Ok(Assertion {
                id: AssertionId(conn.last_insert_rowid()),
                assessment_tracker_id: assertion.assessment_tracker_id,
                badge_name: assertion.badge_name,
                fields: assertion.fields,
            })
        })
        .await
    }

    async fn assertions_for_entry(
        &self,
        entry_id: EntryId,
    ) -> Result<Vec<Assertion>, RepositoryError> {
        self.with_conn("assertions_for_entry", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, assessment_tracker_id, badge_name, fields
                     FROM assertions WHERE assessment_tracker_id = ?1 ORDER BY id",
                )
                .map_err(|e| RepositoryError::storage("assertions_for_entry", e.to_string()))?;
            let rows = stmt
                .query_map(params![entry_id.0], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("assertions_for_entry", e.to_string()))?;

            let mut assertions = Vec::new();
            for row in rows {
                let (id, tracker_id, badge_name, fields) = row.map_err(|e| {
                    RepositoryError::storage("assertions_for_entry row", e.to_string())
                })?;
                let fields = serde_json::from_str(&fields).map_err(|e| {
                    RepositoryError::corruption(format!("assertion fields JSON: {}", e))
                })?;
                assertions.push(Assertion {
                    id: AssertionId(id),
                    assessment_tracker_id: EntryId(tracker_id),
                    badge_name,
                    fields,
                });
            }

            Ok(assertions)
        })
        .await
    }
}
