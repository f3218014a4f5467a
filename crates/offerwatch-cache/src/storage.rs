use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::CacheError;

/// Durable key/blob store behind the cache and the poll-state snapshot.
///
/// Calls are synchronous and short; implementations serialize access
/// internally.
pub trait Storage: Send + Sync {
    /// Fetch whichever of `keys` exist. Missing keys are simply absent.
    fn read_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError>;

    fn write(&self, key: &str, payload: &[u8]) -> Result<(), CacheError>;

    fn write_many(&self, entries: &[(String, Vec<u8>)]) -> Result<(), CacheError> {
        for (key, payload) in entries {
            self.write(key, payload)?;
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.read_many(&[key.to_string()])?.remove(key))
    }
}

/// SQLite-backed [`Storage`] using a single `blobs` table.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file. Creates the schema and enables WAL.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(offerwatch_models::cache_schema::BLOB_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(offerwatch_models::cache_schema::BLOB_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Count all stored blobs.
    pub fn count(&self) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl Storage for SqliteStorage {
    fn read_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT payload FROM blobs WHERE key = ?1")?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let payload: Option<Vec<u8>> = stmt
                .query_row(rusqlite::params![key], |row| row.get(0))
                .optional()?;
            if let Some(payload) = payload {
                found.insert(key.clone(), payload);
            }
        }
        Ok(found)
    }

    fn write(&self, key: &str, payload: &[u8]) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO blobs (key, payload, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Batch upsert within a transaction.
    fn write_many(&self, entries: &[(String, Vec<u8>)]) -> Result<(), CacheError> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO blobs (key, payload, updated_at) VALUES (?1, ?2, ?3)",
            )?;
            for (key, payload) in entries {
                stmt.execute(rusqlite::params![key, payload, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
