use crate::store::schema::SessionRecord;
use crate::store::{map_insert_error, parse_timestamp, PooledConnection, SqlitePool, StoreError, StoreResult};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Sessions: one per external conversation, deduplicated by external id and transcript hash
pub struct SessionStore {
    pool: Arc<SqlitePool>,
}

impl SessionStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn find_by_hash(&self, content_hash: &str) -> StoreResult<Option<SessionRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, external_conversation_id, content_hash, created_at
                 FROM sessions WHERE content_hash = ?1",
                [content_hash],
                Self::row_to_session,
            )
            .optional()?)
    }

    pub fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<SessionRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, external_conversation_id, content_hash, created_at
                 FROM sessions WHERE external_conversation_id = ?1",
                [external_id],
                Self::row_to_session,
            )
            .optional()?)
    }

    pub fn get_by_id(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT id, external_conversation_id, content_hash, created_at
                 FROM sessions WHERE id = ?1",
                [id],
                Self::row_to_session,
            )
            .optional()?)
    }

    /// Inserts a session with no content hash yet.
    pub fn create(&self, external_id: &str) -> StoreResult<SessionRecord> {
        let conn = self.get_conn()?;
        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            external_conversation_id: external_id.to_string(),
            content_hash: None,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO sessions (id, external_conversation_id, content_hash, created_at)
             VALUES (?1, ?2, NULL, ?3)",
            params![session.id, session.external_conversation_id, session.created_at.to_rfc3339()],
        )
        .map_err(|e| map_insert_error(e, "session", external_id))?;
        debug!("Created session {} for conversation {}", session.id, external_id);
        Ok(session)
    }

    /// Returns the session for `external_id`, creating it if needed. A concurrent
    /// creator winning the insert is resolved by reading its row.
    pub fn find_or_create(&self, external_id: &str) -> StoreResult<SessionRecord> {
        if let Some(existing) = self.find_by_external_id(external_id)? {
            return Ok(existing);
        }
        match self.create(external_id) {
            Ok(session) => Ok(session),
            Err(StoreError::UniquenessConflict { .. }) => self
                .find_by_external_id(external_id)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "session",
                    key: external_id.to_string(),
                }),
            Err(e) => Err(e),
        }
    }

    /// Records the transcript hash once every discussion of the session is processed.
    pub fn mark_processed(&self, session_id: &str, content_hash: &str) -> StoreResult<()> {
        let conn = self.get_conn()?;
        let updated = conn
            .execute(
                "UPDATE sessions SET content_hash = ?1 WHERE id = ?2",
                params![content_hash, session_id],
            )
            .map_err(|e| map_insert_error(e, "session hash", content_hash))?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                key: session_id.to_string(),
            });
        }
        Ok(())
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<SessionRecord> {
        let created_at: String = row.get(3)?;
        Ok(SessionRecord {
            id: row.get(0)?,
            external_conversation_id: row.get(1)?,
            content_hash: row.get(2)?,
            created_at: parse_timestamp(&created_at, 3)?,
        })
    }
}
