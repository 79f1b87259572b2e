//! SQLite database for memo chunks and rate-limit counters
//!
//! One file holds both tables. All methods are synchronous and lock the
//! connection; async callers move them onto the blocking pool.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ratelimit::RateLimitEntry;
use crate::retrieval::similarity::cosine_similarity;
use crate::types::{Candidate, ChunkRecord};

/// SQLite-backed memo database
pub struct MemoDb {
    conn: Arc<Mutex<Connection>>,
}

impl MemoDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(true)?;
        tracing::info!("Opened memo database at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (tests and ephemeral runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(false)?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self, on_disk: bool) -> Result<()> {
        let conn = self.conn.lock();

        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA cache_size=10000;
                PRAGMA temp_store=MEMORY;
                "#,
            )
            .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                memo_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (owner_id, memo_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_owner_live
                ON chunks(owner_id, deleted, created_at);

            CREATE TABLE IF NOT EXISTS rate_limits (
                identity TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                reset_at_ms INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rate_limits_created ON rate_limits(created_at_ms);
            "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    /// Cheap connectivity check
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // ==================== Chunks ====================

    /// Whether the owner has any live chunk
    pub fn has_chunks(&self, owner_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM chunks WHERE owner_id = ?1 AND deleted = 0 LIMIT 1",
                params![owner_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| Error::Internal(format!("Failed to probe chunks: {}", e)))?;
        Ok(found.is_some())
    }

    /// Brute-force cosine nearest neighbours over the owner's live chunks
    pub fn nearest_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT memo_id, chunk_index, text, embedding FROM chunks
                 WHERE owner_id = ?1 AND deleted = 0",
            )
            .map_err(|e| Error::Internal(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt.query_map(params![owner_id], |row| {
            let memo_id: String = row.get(0)?;
            let chunk_index: i64 = row.get(1)?;
            let text: String = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            Ok((memo_id, chunk_index, text, blob))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (memo_id, chunk_index, text, blob) = row?;
            let embedding = blob_to_embedding(&blob);
            let score = cosine_similarity(&embedding, query);
            candidates.push(Candidate {
                memo_id,
                chunk_index: chunk_index as u32,
                text,
                embedding,
                score,
            });
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// A page of the owner's live chunks, newest memo first
    pub fn list_chunks(&self, owner_id: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT owner_id, memo_id, chunk_index, text, embedding, keywords, deleted, created_at
                 FROM chunks
                 WHERE owner_id = ?1 AND deleted = 0
                 ORDER BY created_at DESC, memo_id, chunk_index
                 LIMIT ?2",
            )
            .map_err(|e| Error::Internal(format!("Failed to prepare statement: {}", e)))?;

        let records = stmt
            .query_map(params![owner_id, limit as i64], row_to_chunk_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Insert chunks in one transaction, replacing any with the same key
    pub fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(format!("Failed to begin transaction: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO chunks (
                        owner_id, memo_id, chunk_index, text, embedding, keywords, deleted, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(owner_id, memo_id, chunk_index) DO UPDATE SET
                        text = excluded.text,
                        embedding = excluded.embedding,
                        keywords = excluded.keywords,
                        deleted = excluded.deleted,
                        created_at = excluded.created_at
                    "#,
                )
                .map_err(|e| Error::Internal(format!("Failed to prepare statement: {}", e)))?;

            for chunk in chunks {
                stmt.execute(params![
                    chunk.owner_id,
                    chunk.memo_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    embedding_to_blob(&chunk.embedding),
                    serde_json::to_string(&chunk.keywords)?,
                    chunk.deleted as i64,
                    format_timestamp(&chunk.created_at),
                ])
                .map_err(|e| Error::Internal(format!("Failed to insert chunk: {}", e)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::Internal(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    /// Soft-delete a memo's live chunks
    pub fn mark_memo_deleted(&self, owner_id: &str, memo_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let flagged = conn
            .execute(
                "UPDATE chunks SET deleted = 1 WHERE owner_id = ?1 AND memo_id = ?2 AND deleted = 0",
                params![owner_id, memo_id],
            )
            .map_err(|e| Error::Internal(format!("Failed to delete memo: {}", e)))?;
        Ok(flagged)
    }

    // ==================== Rate limits ====================

    /// Read one identity's counter
    pub fn get_rate_limit(&self, identity: &str) -> Result<Option<RateLimitEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT count, reset_at_ms, created_at_ms FROM rate_limits WHERE identity = ?1",
                params![identity],
                |row| {
                    let count: i64 = row.get(0)?;
                    let reset_at_ms: i64 = row.get(1)?;
                    let created_at_ms: i64 = row.get(2)?;
                    Ok(RateLimitEntry {
                        count: count as u32,
                        reset_at: from_millis(reset_at_ms),
                        created_at: from_millis(created_at_ms),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Write one identity's counter
    pub fn put_rate_limit(&self, identity: &str, entry: &RateLimitEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO rate_limits (identity, count, reset_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity,
                entry.count as i64,
                entry.reset_at.timestamp_millis(),
                entry.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Remove one identity's counter
    pub fn delete_rate_limit(&self, identity: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM rate_limits WHERE identity = ?1", params![identity])?;
        Ok(())
    }

    /// Delete at most `limit` counters created before `cutoff`
    pub fn delete_rate_limits_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM rate_limits WHERE identity IN (
                SELECT identity FROM rate_limits WHERE created_at_ms < ?1 LIMIT ?2
             )",
            params![cutoff.timestamp_millis(), limit as i64],
        )?;
        Ok(deleted)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed precision keeps lexical order equal to time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_chunk_record(row: &rusqlite::Row) -> rusqlite::Result<ChunkRecord> {
    let owner_id: String = row.get(0)?;
    let memo_id: String = row.get(1)?;
    let chunk_index: i64 = row.get(2)?;
    let text: String = row.get(3)?;
    let blob: Vec<u8> = row.get(4)?;
    let keywords_json: String = row.get(5)?;
    let deleted: i64 = row.get(6)?;
    let created_at_str: String = row.get(7)?;

    Ok(ChunkRecord {
        owner_id,
        memo_id,
        chunk_index: chunk_index as u32,
        text,
        embedding: blob_to_embedding(&blob),
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        deleted: deleted != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
