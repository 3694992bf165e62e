//! Classification database - SQLite-backed storage for sessions, discussions,
//! labels/subjects, the thematic/topic taxonomy and their links.
pub mod schema;
pub mod migration;
pub mod vector;
pub mod session_store;
pub mod record_store;
pub mod classification_store;
pub mod taxonomy_store;

pub use schema::*;
pub use migration::MigrationManager;
pub use session_store::SessionStore;
pub use record_store::RecordStore;
pub use classification_store::{ClassificationStore, NewClassification, PersistOutcome};
pub use taxonomy_store::{LabelTopicLink, NewTopic, TaxonomyStore};

use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;
use tracing::info;

pub(crate) type SqlitePool = Pool<SqliteConnectionManager>;
pub(crate) type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent writer inserted the same unique key first.
    #[error("{entity} '{key}' already exists")]
    UniquenessConflict { entity: &'static str, key: String },

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("embedding encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(self, Self::UniquenessConflict { .. })
    }
}

/// Turns a UNIQUE / PRIMARY KEY violation into [`StoreError::UniquenessConflict`].
pub(crate) fn map_insert_error(err: rusqlite::Error, entity: &'static str, key: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return StoreError::UniquenessConflict {
                entity,
                key: key.to_string(),
            };
        }
    }
    StoreError::Sqlite(err)
}

pub(crate) fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Which deduplicated entity a pipeline deployment stores: two-level
/// labels (with topics) or flat subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Label,
    Subject,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Subject => "subject",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Label => "labels",
            Self::Subject => "subjects",
        }
    }

    pub(crate) fn link_table(&self) -> &'static str {
        match self {
            Self::Label => "discussion_classifications",
            Self::Subject => "discussion_subjects",
        }
    }

    pub(crate) fn link_column(&self) -> &'static str {
        match self {
            Self::Label => "label_id",
            Self::Subject => "subject_id",
        }
    }

    /// Subjects have no stored canonical flag; a subject is canonical when it aliases nothing.
    pub(crate) fn canonical_expr(&self) -> &'static str {
        match self {
            Self::Label => "is_canonical",
            Self::Subject => "(alias_of IS NULL AND name <> 'skip')",
        }
    }
}

pub struct ClassificationDatabase {
    pub sessions: SessionStore,
    pub labels: RecordStore,
    pub subjects: RecordStore,
    pub classifications: ClassificationStore,
    pub taxonomy: TaxonomyStore,
    pool: Arc<SqlitePool>,
}

impl ClassificationDatabase {
    pub fn new(db_path: &Path, pool_size: u32) -> StoreResult<Self> {
        info!("Opening classification database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::from_pool(pool)
    }

    /// Single-connection in-memory database; every store shares that connection.
    pub fn new_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        {
            let mut conn = pool.get()?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.initialize_database()?;
        }
        let pool = Arc::new(pool);
        info!("Classification database initialized");
        Ok(Self {
            sessions: SessionStore::new(Arc::clone(&pool)),
            labels: RecordStore::new(Arc::clone(&pool), RecordKind::Label),
            subjects: RecordStore::new(Arc::clone(&pool), RecordKind::Subject),
            classifications: ClassificationStore::new(Arc::clone(&pool)),
            taxonomy: TaxonomyStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    pub fn records(&self, kind: RecordKind) -> &RecordStore {
        match kind {
            RecordKind::Label => &self.labels,
            RecordKind::Subject => &self.subjects,
        }
    }

    pub fn get_stats(&self) -> StoreResult<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }
}
