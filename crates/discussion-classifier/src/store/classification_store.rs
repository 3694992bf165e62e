//! Discussions and the rows linking each one to its label or subject.
use crate::store::schema::{ClassificationRecord, DetectedEntity, DiscussionRecord};
use crate::store::{
    map_insert_error, parse_timestamp, PooledConnection, RecordKind, SqlitePool, StoreError, StoreResult,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything needed to persist one classified discussion.
#[derive(Debug, Clone)]
pub struct NewClassification<'a> {
    pub kind: RecordKind,
    pub session_id: &'a str,
    pub discussion_timestamp: i64,
    pub discussion_hash: &'a str,
    pub record_id: &'a str,
    pub confidence: f64,
    pub classification_method: &'a str,
    pub detected_entity: DetectedEntity,
}

#[derive(Debug, Clone)]
pub enum PersistOutcome {
    Persisted {
        discussion: DiscussionRecord,
        classification: ClassificationRecord,
    },
    /// Another worker committed the same discussion hash first.
    AlreadyPersisted,
}

pub struct ClassificationStore {
    pool: Arc<SqlitePool>,
}

impl ClassificationStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn get_discussion_by_hash(&self, content_hash: &str) -> StoreResult<Option<DiscussionRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, session_id, timestamp, content_hash, created_at
                 FROM discussions WHERE content_hash = ?1",
                [content_hash],
                Self::row_to_discussion,
            )
            .optional()?)
    }

    pub fn discussion_exists(&self, content_hash: &str) -> StoreResult<bool> {
        Ok(self.get_discussion_by_hash(content_hash)?.is_some())
    }

    /// Writes the discussion and its classification link in one transaction.
    /// A discussion hash that is already stored rolls everything back and
    /// reports [`PersistOutcome::AlreadyPersisted`].
    pub fn persist(&self, new: &NewClassification<'_>) -> StoreResult<PersistOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let discussion = DiscussionRecord {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id.to_string(),
            timestamp: new.discussion_timestamp,
            content_hash: new.discussion_hash.to_string(),
            created_at: now,
        };
        let inserted = tx.execute(
            "INSERT INTO discussions (id, session_id, timestamp, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                discussion.id,
                discussion.session_id,
                discussion.timestamp,
                discussion.content_hash,
                now.to_rfc3339()
            ],
        );
        match inserted.map_err(|e| map_insert_error(e, "discussion", new.discussion_hash)) {
            Ok(_) => {}
            Err(StoreError::UniquenessConflict { .. }) => {
                info!("Discussion {} already persisted, skipping", new.discussion_hash);
                return Ok(PersistOutcome::AlreadyPersisted);
            }
            Err(e) => return Err(e),
        }

        let classification = ClassificationRecord {
            id: Uuid::new_v4().to_string(),
            discussion_id: discussion.id.clone(),
            record_id: new.record_id.to_string(),
            confidence: new.confidence,
            discussion_timestamp: new.discussion_timestamp,
            discussion_hash: new.discussion_hash.to_string(),
            classification_method: new.classification_method.to_string(),
            detected_entity: new.detected_entity,
            created_at: now,
        };
        let sql = format!(
            "INSERT INTO {} (id, discussion_id, {}, confidence, discussion_timestamp, discussion_hash,
                             classification_method, detected_entity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            new.kind.link_table(),
            new.kind.link_column()
        );
        tx.execute(
            &sql,
            params![
                classification.id,
                classification.discussion_id,
                classification.record_id,
                classification.confidence,
                classification.discussion_timestamp,
                classification.discussion_hash,
                classification.classification_method,
                classification.detected_entity.as_str(),
                now.to_rfc3339()
            ],
        )
        .map_err(|e| map_insert_error(e, "classification", new.discussion_hash))?;

        tx.commit()?;
        debug!(
            "Persisted discussion {} -> {} {}",
            discussion.id,
            new.kind.as_str(),
            new.record_id
        );
        Ok(PersistOutcome::Persisted {
            discussion,
            classification,
        })
    }

    pub fn get_classification_by_hash(
        &self,
        kind: RecordKind,
        discussion_hash: &str,
    ) -> StoreResult<Option<ClassificationRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT id, discussion_id, {}, confidence, discussion_timestamp, discussion_hash,
                    classification_method, detected_entity, created_at
             FROM {} WHERE discussion_hash = ?1",
            kind.link_column(),
            kind.link_table()
        );
        Ok(conn
            .query_row(&sql, [discussion_hash], Self::row_to_classification)
            .optional()?)
    }

    /// Number of discussions attached to a label or subject.
    pub fn count_for_record(&self, kind: RecordKind, record_id: &str) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            kind.link_table(),
            kind.link_column()
        );
        Ok(conn.query_row(&sql, [record_id], |row| row.get(0))?)
    }

    pub fn count_for_session(&self, session_id: &str) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM discussions WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?)
    }

    fn row_to_discussion(row: &Row) -> rusqlite::Result<DiscussionRecord> {
        let created_at: String = row.get(4)?;
        Ok(DiscussionRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: row.get(2)?,
            content_hash: row.get(3)?,
            created_at: parse_timestamp(&created_at, 4)?,
        })
    }

    fn row_to_classification(row: &Row) -> rusqlite::Result<ClassificationRecord> {
        let entity: String = row.get(7)?;
        let created_at: String = row.get(8)?;
        Ok(ClassificationRecord {
            id: row.get(0)?,
            discussion_id: row.get(1)?,
            record_id: row.get(2)?,
            confidence: row.get(3)?,
            discussion_timestamp: row.get(4)?,
            discussion_hash: row.get(5)?,
            classification_method: row.get(6)?,
            detected_entity: DetectedEntity::parse(&entity).unwrap_or_default(),
            created_at: parse_timestamp(&created_at, 8)?,
        })
    }
}
