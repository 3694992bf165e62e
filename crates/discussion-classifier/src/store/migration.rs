//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

use crate::store::schema;

/// Applies the embedded migrations in version order
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create the version table if needed and bring the schema up to date
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_taxonomy.sql")),
        (3, include_str!("migrations/003_subjects.sql")),
    ]
}

pub fn latest_version() -> i32 {
    get_migrations().last().map(|(v, _)| *v).unwrap_or(0)
}

/// Row counts per table; read-only
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to count rows in {}: {}", table_name, e);
                Ok(0)
            })
    }

    let schema_version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(schema::DatabaseStats {
        sessions: table_count(conn, "sessions")?,
        discussions: table_count(conn, "discussions")?,
        labels: table_count(conn, "labels")?,
        subjects: table_count(conn, "subjects")?,
        thematics: table_count(conn, "thematics")?,
        topics: table_count(conn, "topics")?,
        label_topics: table_count(conn, "label_topics")?,
        schema_version,
    })
}
