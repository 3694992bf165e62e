//! Deduplicated records (labels or subjects) with embedding similarity search.
use crate::store::schema::{DedupRecord, SimilarRecord};
use crate::store::vector::{cosine_similarity, decode_column, decode_embedding, encode_embedding, rank};
use crate::store::{
    map_insert_error, parse_timestamp, PooledConnection, RecordKind, SqlitePool, StoreError, StoreResult,
};
use crate::utils::TextUtils;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Reserved name of the sentinel record that SKIP classifications point at.
pub const SKIP_RECORD_NAME: &str = "skip";

const MAX_ALIAS_DEPTH: usize = 16;

pub struct RecordStore {
    pool: Arc<SqlitePool>,
    kind: RecordKind,
}

impl RecordStore {
    pub fn new(pool: Arc<SqlitePool>, kind: RecordKind) -> Self {
        Self { pool, kind }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    fn get_conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn select_sql(&self, filter: &str) -> String {
        format!(
            "SELECT id, name, embedding, {}, alias_of, created_at FROM {} {}",
            self.kind.canonical_expr(),
            self.kind.table(),
            filter
        )
    }

    /// Records whose embedding scores at least `threshold` against `embedding`,
    /// most similar first. Rows without an embedding never match.
    pub fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> StoreResult<Vec<SimilarRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, alias_of, embedding FROM {} WHERE embedding IS NOT NULL ORDER BY rowid",
            self.kind.table()
        ))?;
        let mut rows = stmt.query([])?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next()? {
            let bytes: Vec<u8> = row.get(3)?;
            let candidate = decode_embedding(&bytes)?;
            let similarity = cosine_similarity(embedding, &candidate);
            scored.push((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?),
                similarity,
            ));
        }

        let matches: Vec<SimilarRecord> = rank(scored, threshold, limit)
            .into_iter()
            .map(|((id, name, alias_of), similarity)| SimilarRecord {
                id,
                name,
                alias_of,
                similarity,
            })
            .collect();
        debug!(
            "{} similarity search: {} match(es) at threshold {:.2}",
            self.kind.as_str(),
            matches.len(),
            threshold
        );
        Ok(matches)
    }

    /// Inserts a record under its normalized name. Fails with
    /// [`StoreError::UniquenessConflict`] if that name is taken.
    pub fn create(
        &self,
        name: &str,
        embedding: Option<&[f32]>,
        alias_of: Option<&str>,
    ) -> StoreResult<DedupRecord> {
        self.insert(name, embedding, alias_of, alias_of.is_none())
    }

    fn insert(
        &self,
        name: &str,
        embedding: Option<&[f32]>,
        alias_of: Option<&str>,
        is_canonical: bool,
    ) -> StoreResult<DedupRecord> {
        let record = DedupRecord {
            id: Uuid::new_v4().to_string(),
            name: TextUtils::normalize_label(name),
            embedding: embedding.map(|e| e.to_vec()),
            is_canonical,
            alias_of: alias_of.map(str::to_string),
            created_at: Utc::now(),
        };
        let blob = embedding.map(encode_embedding).transpose()?;

        let conn = self.get_conn()?;
        let result = match self.kind {
            RecordKind::Label => conn.execute(
                "INSERT INTO labels (id, name, embedding, is_canonical, alias_of, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.name,
                    blob,
                    record.is_canonical,
                    record.alias_of,
                    record.created_at.to_rfc3339()
                ],
            ),
            RecordKind::Subject => conn.execute(
                "INSERT INTO subjects (id, name, embedding, alias_of, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.name,
                    blob,
                    record.alias_of,
                    record.created_at.to_rfc3339()
                ],
            ),
        };
        result.map_err(|e| map_insert_error(e, self.kind.as_str(), &record.name))?;

        debug!("Created {} '{}' ({})", self.kind.as_str(), record.name, record.id);
        Ok(record)
    }

    pub fn get_by_id(&self, id: &str) -> StoreResult<Option<DedupRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(&self.select_sql("WHERE id = ?1"), [id], Self::row_to_record)
            .optional()?)
    }

    /// Exact lookup on the normalized form of `name`.
    pub fn get_by_name(&self, name: &str) -> StoreResult<Option<DedupRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                &self.select_sql("WHERE name = ?1"),
                [TextUtils::normalize_label(name)],
                Self::row_to_record,
            )
            .optional()?)
    }

    /// The sentinel record for SKIP classifications, created on first use.
    /// It is never canonical and carries no embedding.
    pub fn get_or_create_skip(&self) -> StoreResult<DedupRecord> {
        if let Some(existing) = self.get_by_name(SKIP_RECORD_NAME)? {
            return Ok(existing);
        }
        match self.insert(SKIP_RECORD_NAME, None, None, false) {
            Ok(record) => Ok(record),
            Err(StoreError::UniquenessConflict { .. }) => {
                self.get_by_name(SKIP_RECORD_NAME)?.ok_or_else(|| StoreError::NotFound {
                    entity: self.kind.as_str(),
                    key: SKIP_RECORD_NAME.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Follows `alias_of` links up to the canonical record.
    pub fn canonical_root(&self, id: &str) -> StoreResult<String> {
        let conn = self.get_conn()?;
        let mut current = id.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            let parent: Option<Option<String>> = conn
                .query_row(
                    &format!("SELECT alias_of FROM {} WHERE id = ?1", self.kind.table()),
                    [&current],
                    |row| row.get(0),
                )
                .optional()?;
            match parent {
                Some(Some(next)) => current = next,
                Some(None) => return Ok(current),
                None => {
                    return Err(StoreError::NotFound {
                        entity: self.kind.as_str(),
                        key: current,
                    })
                }
            }
        }
        Ok(current)
    }

    pub fn count(&self) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.kind.table()), [], |row| {
            row.get(0)
        })?)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<DedupRecord> {
        let created_at: String = row.get(5)?;
        Ok(DedupRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            embedding: decode_column(row.get(2)?, 2)?,
            is_canonical: row.get(3)?,
            alias_of: row.get(4)?,
            created_at: parse_timestamp(&created_at, 5)?,
        })
    }
}
