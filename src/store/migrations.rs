//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS server_configs (
                guild_id TEXT PRIMARY KEY,
                welcome_channel_id TEXT,
                custom_welcome_message TEXT,
                default_tour_id INTEGER,
                rules_channel_id TEXT,
                announcements_channel_id TEXT,
                guides_channel_id TEXT
            );

            CREATE TABLE IF NOT EXISTS tours (
                tour_id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                tour_name TEXT NOT NULL,
                description TEXT,
                completion_role_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_tours_guild ON tours(guild_id);

            CREATE TABLE IF NOT EXISTS tour_steps (
                step_id INTEGER PRIMARY KEY AUTOINCREMENT,
                tour_id INTEGER NOT NULL REFERENCES tours(tour_id),
                step_number INTEGER NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                image_url TEXT,
                video_url TEXT,
                channel_to_showcase TEXT,
                required_role_id TEXT,
                UNIQUE(tour_id, step_number)
            );
            CREATE INDEX IF NOT EXISTS idx_tour_steps_tour ON tour_steps(tour_id);

            CREATE TABLE IF NOT EXISTS user_progress (
                progress_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                tour_id INTEGER NOT NULL REFERENCES tours(tour_id),
                current_step_id INTEGER,
                status TEXT NOT NULL DEFAULT 'not_started',
                started_at TEXT,
                completed_at TEXT,
                UNIQUE(user_id, guild_id, tour_id)
            );
            CREATE INDEX IF NOT EXISTS idx_user_progress_user ON user_progress(user_id, guild_id);
            CREATE INDEX IF NOT EXISTS idx_user_progress_tour ON user_progress(tour_id);

            CREATE TABLE IF NOT EXISTS tour_analytics (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                tour_id INTEGER NOT NULL,
                user_id TEXT,
                event_type TEXT NOT NULL,
                step_id INTEGER,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tour_analytics_tour ON tour_analytics(tour_id);
            CREATE INDEX IF NOT EXISTS idx_tour_analytics_type ON tour_analytics(event_type);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` tracking table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
