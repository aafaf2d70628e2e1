//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Multi-statement structural
//! changes (cascade delete, insert-with-shift, renumber, move-swap) run in
//! explicit BEGIN/COMMIT transactions and roll back on any failure.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    ConfigUpdate, InsertedStep, MoveDirection, NewStep, ServerConfig, Step, StepContent, StepId,
    Tour, TourEvent, TourId, TourRef, UserProgress,
};
use crate::store::traits::Store;
use crate::tour::status::{ExitReason, TourStatus};

/// libSQL store backend.
///
/// Stores a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use;
/// the unique constraints on (tour_id, step_number) and (user, guild, tour)
/// remain the last line of defense against racing writers.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn open_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Transaction helpers ─────────────────────────────────────────

    async fn begin(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
        Ok(())
    }

    /// Best-effort rollback; the original error is what the caller sees.
    async fn rollback(&self) {
        if let Err(e) = self.conn.execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {e}");
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql Value (NULL when absent).
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

const CONFIG_COLUMNS: &str = "guild_id, welcome_channel_id, custom_welcome_message, default_tour_id, rules_channel_id, announcements_channel_id, guides_channel_id";

fn row_to_config(row: &libsql::Row) -> Result<ServerConfig, libsql::Error> {
    Ok(ServerConfig {
        guild_id: row.get(0)?,
        welcome_channel_id: row.get(1)?,
        custom_welcome_message: row.get(2)?,
        default_tour_id: row.get(3)?,
        rules_channel_id: row.get(4)?,
        announcements_channel_id: row.get(5)?,
        guides_channel_id: row.get(6)?,
    })
}

const TOUR_COLUMNS: &str =
    "tour_id, guild_id, tour_name, description, completion_role_id, created_at";

fn row_to_tour(row: &libsql::Row) -> Result<Tour, libsql::Error> {
    let created_str: String = row.get(5)?;
    Ok(Tour {
        tour_id: row.get(0)?,
        guild_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        completion_role_id: row.get(4)?,
        created_at: parse_datetime(&created_str),
    })
}

const STEP_COLUMNS: &str = "step_id, tour_id, step_number, title, content, image_url, video_url, channel_to_showcase, required_role_id";

fn row_to_step(row: &libsql::Row) -> Result<Step, libsql::Error> {
    let raw_content: String = row.get(4)?;
    Ok(Step {
        step_id: row.get(0)?,
        tour_id: row.get(1)?,
        step_number: row.get(2)?,
        title: row.get(3)?,
        content: StepContent::from_raw(&raw_content),
        image_url: row.get(5)?,
        video_url: row.get(6)?,
        channel_to_showcase: row.get(7)?,
        required_role_id: row.get(8)?,
    })
}

const PROGRESS_COLUMNS: &str =
    "user_id, guild_id, tour_id, current_step_id, status, started_at, completed_at";

fn row_to_progress(row: &libsql::Row) -> Result<UserProgress, libsql::Error> {
    let status_str: String = row.get(4)?;
    let started_str: Option<String> = row.get(5)?;
    let completed_str: Option<String> = row.get(6)?;
    Ok(UserProgress {
        user_id: row.get(0)?,
        guild_id: row.get(1)?,
        tour_id: row.get(2)?,
        current_step_id: row.get(3)?,
        status: TourStatus::parse(&status_str),
        started_at: started_str.as_deref().map(parse_datetime),
        completed_at: completed_str.as_deref().map(parse_datetime),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Server config ───────────────────────────────────────────────

    async fn ensure_config(&self, guild_id: &str) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO server_configs (guild_id) VALUES (?1)",
                params![guild_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_config: {e}")))?;

        if changed > 0 {
            info!(guild_id, "Server config created");
        }
        Ok(changed > 0)
    }

    async fn get_config(&self, guild_id: &str) -> Result<Option<ServerConfig>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONFIG_COLUMNS} FROM server_configs WHERE guild_id = ?1"),
                params![guild_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let config = row_to_config(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_config row parse: {e}")))?;
                Ok(Some(config))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_config: {e}"))),
        }
    }

    async fn update_config(
        &self,
        guild_id: &str,
        updates: &[ConfigUpdate],
    ) -> Result<u64, DatabaseError> {
        if updates.is_empty() {
            debug!(guild_id, "update_config called with no fields; no-op");
            return Ok(0);
        }

        // The SET list is built exclusively from the typed allow-list enum,
        // never from caller-supplied column names.
        let mut assignments = Vec::with_capacity(updates.len());
        let mut values: Vec<libsql::Value> = Vec::with_capacity(updates.len() + 1);
        for (i, update) in updates.iter().enumerate() {
            assignments.push(format!("{} = ?{}", update.column(), i + 1));
            values.push(match update {
                ConfigUpdate::WelcomeChannel(v)
                | ConfigUpdate::CustomWelcomeMessage(v)
                | ConfigUpdate::RulesChannel(v)
                | ConfigUpdate::AnnouncementsChannel(v)
                | ConfigUpdate::GuidesChannel(v) => opt_text(v.as_deref()),
                ConfigUpdate::DefaultTour(v) => opt_int(*v),
            });
        }
        values.push(libsql::Value::Text(guild_id.to_string()));

        let sql = format!(
            "UPDATE server_configs SET {} WHERE guild_id = ?{}",
            assignments.join(", "),
            updates.len() + 1
        );

        let changed = self
            .conn()
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_config: {e}")))?;

        debug!(guild_id, changed, "Server config updated");
        Ok(changed)
    }

    // ── Tours ───────────────────────────────────────────────────────

    async fn add_tour(
        &self,
        guild_id: &str,
        name: &str,
        description: Option<&str>,
        completion_role_id: Option<&str>,
    ) -> Result<TourId, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tours (guild_id, tour_name, description, completion_role_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                guild_id,
                name,
                opt_text(description),
                opt_text(completion_role_id),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("add_tour: {e}")))?;

        let tour_id = conn.last_insert_rowid();
        info!(guild_id, tour_id, name, "Tour created");
        Ok(tour_id)
    }

    async fn add_tour_with_steps(
        &self,
        guild_id: &str,
        name: &str,
        steps: &[NewStep],
        completion_role_id: Option<&str>,
    ) -> Result<TourId, DatabaseError> {
        self.begin().await?;
        let result: Result<TourId, DatabaseError> = async {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO tours (guild_id, tour_name, completion_role_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    guild_id,
                    name,
                    opt_text(completion_role_id),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_tour_with_steps: {e}")))?;

            let tour_id = conn.last_insert_rowid();
            for (number, step) in steps.iter().enumerate() {
                conn.execute(
                    "INSERT INTO tour_steps (tour_id, step_number, title, content)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        tour_id,
                        number as i64,
                        opt_text(step.title.as_deref()),
                        step.content.to_json(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("add_tour_with_steps step: {e}")))?;
            }
            Ok(tour_id)
        }
        .await;

        match result {
            Ok(tour_id) => {
                self.commit().await?;
                info!(guild_id, tour_id, name, steps = steps.len(), "Tour created with steps");
                Ok(tour_id)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn list_tours(&self, guild_id: &str) -> Result<Vec<Tour>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TOUR_COLUMNS} FROM tours WHERE guild_id = ?1 ORDER BY tour_id ASC"
                ),
                params![guild_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tours: {e}")))?;

        let mut tours = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_tour(&row) {
                Ok(tour) => tours.push(tour),
                Err(e) => tracing::warn!("Skipping tour row: {e}"),
            }
        }
        Ok(tours)
    }

    async fn get_tour(&self, tour_id: TourId) -> Result<Option<Tour>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TOUR_COLUMNS} FROM tours WHERE tour_id = ?1"),
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tour: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tour(&row).map_err(|e| {
                DatabaseError::Query(format!("get_tour row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_tour: {e}"))),
        }
    }

    async fn find_tour(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
    ) -> Result<Option<Tour>, DatabaseError> {
        let (sql, param) = match tour_ref {
            TourRef::ById(id) => (
                format!("SELECT {TOUR_COLUMNS} FROM tours WHERE guild_id = ?1 AND tour_id = ?2"),
                libsql::Value::Integer(*id),
            ),
            TourRef::ByName(name) => (
                format!(
                    "SELECT {TOUR_COLUMNS} FROM tours WHERE guild_id = ?1 AND lower(tour_name) = lower(?2)"
                ),
                libsql::Value::Text(name.clone()),
            ),
        };

        let mut rows = self
            .conn()
            .query(&sql, params![guild_id, param])
            .await
            .map_err(|e| DatabaseError::Query(format!("find_tour: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tour(&row).map_err(|e| {
                DatabaseError::Query(format!("find_tour row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_tour: {e}"))),
        }
    }

    async fn set_completion_role(
        &self,
        tour_id: TourId,
        role_id: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tours SET completion_role_id = ?1 WHERE tour_id = ?2",
                params![opt_text(role_id), tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_completion_role: {e}")))?;

        debug!(tour_id, role = ?role_id, changed, "Completion role updated");
        Ok(changed)
    }

    async fn delete_tour_cascade(&self, tour_id: TourId) -> Result<u64, DatabaseError> {
        self.begin().await?;
        let result: Result<u64, DatabaseError> = async {
            let conn = self.conn();
            conn.execute(
                "DELETE FROM tour_analytics WHERE tour_id = ?1",
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete cascade analytics: {e}")))?;

            conn.execute(
                "DELETE FROM user_progress WHERE tour_id = ?1",
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete cascade progress: {e}")))?;

            conn.execute(
                "DELETE FROM tour_steps WHERE tour_id = ?1",
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete cascade steps: {e}")))?;

            let deleted = conn
                .execute("DELETE FROM tours WHERE tour_id = ?1", params![tour_id])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete cascade tour: {e}")))?;
            Ok(deleted)
        }
        .await;

        match result {
            Ok(deleted) => {
                self.commit().await?;
                info!(tour_id, deleted, "Tour deleted with associated data");
                Ok(deleted)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    // ── Steps ───────────────────────────────────────────────────────

    async fn list_steps(&self, tour_id: TourId) -> Result<Vec<Step>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM tour_steps WHERE tour_id = ?1 ORDER BY step_number ASC"
                ),
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_steps: {e}")))?;

        let mut steps = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_step(&row) {
                Ok(step) => steps.push(step),
                Err(e) => tracing::warn!("Skipping step row: {e}"),
            }
        }
        Ok(steps)
    }

    async fn get_step(&self, step_id: StepId) -> Result<Option<Step>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STEP_COLUMNS} FROM tour_steps WHERE step_id = ?1"),
                params![step_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_step: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_step(&row).map_err(|e| {
                DatabaseError::Query(format!("get_step row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_step: {e}"))),
        }
    }

    async fn max_step_number(&self, tour_id: TourId) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MAX(step_number) FROM tour_steps WHERE tour_id = ?1",
                params![tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("max_step_number: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let max: Option<i64> = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("max_step_number parse: {e}")))?;
                Ok(max)
            }
            _ => Ok(None),
        }
    }

    async fn insert_step(
        &self,
        tour_id: TourId,
        position: Option<i64>,
        title: Option<&str>,
        content: &StepContent,
    ) -> Result<InsertedStep, DatabaseError> {
        let max_step = self.max_step_number(tour_id).await?;
        let append_at = max_step.map_or(0, |m| m + 1);
        let target = match position {
            None => append_at,
            Some(p) if p > append_at => append_at,
            Some(p) => p.max(0),
        };

        self.begin().await?;
        let result: Result<InsertedStep, DatabaseError> = async {
            let conn = self.conn();

            // Shift steps at/after the target position up by one. Done in
            // two phases through negative numbers so the per-tour uniqueness
            // constraint never sees two steps at the same position.
            if target < append_at {
                conn.execute(
                    "UPDATE tour_steps SET step_number = -(step_number + 1)
                     WHERE tour_id = ?1 AND step_number >= ?2",
                    params![tour_id, target],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_step shift: {e}")))?;
                conn.execute(
                    "UPDATE tour_steps SET step_number = -step_number
                     WHERE tour_id = ?1 AND step_number < 0",
                    params![tour_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_step unshift: {e}")))?;
            }

            conn.execute(
                "INSERT INTO tour_steps (tour_id, step_number, title, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tour_id, target, opt_text(title), content.to_json()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_step: {e}")))?;

            Ok(InsertedStep {
                step_id: conn.last_insert_rowid(),
                step_number: target,
            })
        }
        .await;

        match result {
            Ok(inserted) => {
                self.commit().await?;
                info!(
                    tour_id,
                    step_id = inserted.step_id,
                    step_number = inserted.step_number,
                    "Step added"
                );
                Ok(inserted)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn edit_step(
        &self,
        step_id: StepId,
        title: Option<&str>,
        content: &StepContent,
    ) -> Result<u64, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tour_steps SET title = ?1, content = ?2 WHERE step_id = ?3",
                params![opt_text(title), content.to_json(), step_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("edit_step: {e}")))?;

        debug!(step_id, changed, "Step edited");
        Ok(changed)
    }

    async fn delete_step_and_renumber(&self, step_id: StepId) -> Result<u64, DatabaseError> {
        // Need the owning tour before the row disappears.
        let Some(step) = self.get_step(step_id).await? else {
            return Ok(0);
        };
        let tour_id = step.tour_id;

        self.begin().await?;
        let result: Result<u64, DatabaseError> = async {
            let conn = self.conn();
            let deleted = conn
                .execute(
                    "DELETE FROM tour_steps WHERE step_id = ?1",
                    params![step_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_step: {e}")))?;

            if deleted == 0 {
                return Ok(0);
            }

            // Full resequence to 0..N−1 in current order. Each new number is
            // ≤ its old number and ascending order vacates positions first,
            // so the uniqueness constraint holds at every write.
            let mut rows = conn
                .query(
                    "SELECT step_id FROM tour_steps WHERE tour_id = ?1 ORDER BY step_number ASC",
                    params![tour_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("renumber select: {e}")))?;

            let mut remaining: Vec<StepId> = Vec::new();
            while let Ok(Some(row)) = rows.next().await {
                let id: StepId = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("renumber parse: {e}")))?;
                remaining.push(id);
            }

            for (index, id) in remaining.iter().enumerate() {
                conn.execute(
                    "UPDATE tour_steps SET step_number = ?1 WHERE step_id = ?2",
                    params![index as i64, *id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("renumber update: {e}")))?;
            }

            Ok(deleted)
        }
        .await;

        match result {
            Ok(deleted) => {
                self.commit().await?;
                info!(step_id, tour_id, "Step deleted and tour renumbered");
                Ok(deleted)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn move_step(
        &self,
        step_id: StepId,
        direction: MoveDirection,
    ) -> Result<u64, DatabaseError> {
        let Some(step) = self.get_step(step_id).await? else {
            return Ok(0);
        };

        let target = match direction {
            MoveDirection::Up => {
                if step.step_number == 0 {
                    return Ok(0);
                }
                step.step_number - 1
            }
            MoveDirection::Down => {
                let max = self.max_step_number(step.tour_id).await?.unwrap_or(0);
                if step.step_number >= max {
                    return Ok(0);
                }
                step.step_number + 1
            }
        };

        // Find the neighbor currently at the target position.
        let mut rows = self
            .conn()
            .query(
                "SELECT step_id FROM tour_steps WHERE tour_id = ?1 AND step_number = ?2",
                params![step.tour_id, target],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("move_step neighbor: {e}")))?;

        let other_id: StepId = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("move_step neighbor parse: {e}")))?,
            Ok(None) => {
                // Dense ordering means this only happens if a concurrent
                // edit slipped in; treat as a no-op rather than corrupting.
                return Ok(0);
            }
            Err(e) => return Err(DatabaseError::Query(format!("move_step neighbor: {e}"))),
        };

        self.begin().await?;
        let result: Result<u64, DatabaseError> = async {
            let conn = self.conn();
            // Park the moving step at a negative placeholder so the swap
            // never violates the (tour_id, step_number) uniqueness mid-way.
            conn.execute(
                "UPDATE tour_steps SET step_number = ?1 WHERE step_id = ?2",
                params![-step_id, step_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("move_step park: {e}")))?;

            conn.execute(
                "UPDATE tour_steps SET step_number = ?1 WHERE step_id = ?2",
                params![step.step_number, other_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("move_step neighbor swap: {e}")))?;

            conn.execute(
                "UPDATE tour_steps SET step_number = ?1 WHERE step_id = ?2",
                params![target, step_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("move_step place: {e}")))?;

            Ok(2)
        }
        .await;

        match result {
            Ok(changed) => {
                self.commit().await?;
                debug!(step_id, ?direction, target, "Step moved");
                Ok(changed)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    // ── User progress ───────────────────────────────────────────────

    async fn get_active_progress(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM user_progress
                     WHERE user_id = ?1 AND guild_id = ?2 AND status = 'in_progress'
                     ORDER BY progress_id DESC LIMIT 1"
                ),
                params![user_id, guild_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_active_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_progress(&row).map_err(|e| {
                DatabaseError::Query(format!("get_active_progress row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_active_progress: {e}"))),
        }
    }

    async fn get_progress_for_tour(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM user_progress
                     WHERE user_id = ?1 AND guild_id = ?2 AND tour_id = ?3"
                ),
                params![user_id, guild_id, tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_progress_for_tour: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_progress(&row).map_err(|e| {
                DatabaseError::Query(format!("get_progress_for_tour row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_progress_for_tour: {e}"))),
        }
    }

    async fn start_or_restart_tour(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        step_id: StepId,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO user_progress (user_id, guild_id, tour_id, current_step_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, 'in_progress', ?5)
                 ON CONFLICT(user_id, guild_id, tour_id) DO UPDATE SET
                     current_step_id = excluded.current_step_id,
                     status = 'in_progress',
                     started_at = COALESCE(user_progress.started_at, excluded.started_at),
                     completed_at = NULL",
                params![user_id, guild_id, tour_id, step_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("start_or_restart_tour: {e}")))?;

        debug!(user_id, guild_id, tour_id, step_id, "Tour progress upserted");
        Ok(())
    }

    async fn advance_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        step_id: StepId,
    ) -> Result<u64, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE user_progress SET current_step_id = ?1, status = 'in_progress'
                 WHERE user_id = ?2 AND guild_id = ?3 AND tour_id = ?4",
                params![step_id, user_id, guild_id, tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_progress: {e}")))?;
        Ok(changed)
    }

    async fn complete_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
    ) -> Result<u64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE user_progress SET status = 'completed', completed_at = ?1
                 WHERE user_id = ?2 AND guild_id = ?3 AND tour_id = ?4
                   AND status = 'in_progress'",
                params![now, user_id, guild_id, tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_progress: {e}")))?;

        if changed > 0 {
            info!(user_id, guild_id, tour_id, "Tour completed");
        }
        Ok(changed)
    }

    async fn end_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        reason: &ExitReason,
    ) -> Result<u64, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE user_progress SET status = ?1
                 WHERE user_id = ?2 AND guild_id = ?3 AND tour_id = ?4
                   AND status = 'in_progress'",
                params![reason.as_str(), user_id, guild_id, tour_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("end_progress: {e}")))?;

        if changed > 0 {
            info!(user_id, guild_id, tour_id, reason = reason.as_str(), "Tour ended");
        }
        Ok(changed)
    }

    // ── Analytics ───────────────────────────────────────────────────

    async fn log_event(&self, event: &TourEvent) -> Result<(), DatabaseError> {
        let metadata = event
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("log_event metadata: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO tour_analytics (guild_id, tour_id, user_id, event_type, step_id, timestamp, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.guild_id.as_str(),
                    event.tour_id,
                    opt_text(event.user_id.as_deref()),
                    event.event_type.as_str(),
                    opt_int(event.step_id),
                    Utc::now().to_rfc3339(),
                    opt_text(metadata.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_event: {e}")))?;
        Ok(())
    }
}
