//! Persistent thumbnail sink: generated renditions keyed by
//! (image id, size name) in a sibling `*.thumbs.db` database, so the
//! catalog file stays small and the sink can be dropped wholesale.

use crate::catalog::model::ImageId;
use crate::db;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct ThumbSink {
    conn: Mutex<Connection>,
}

impl ThumbSink {
    pub fn open(path: &Path) -> anyhow::Result<ThumbSink> {
        let conn = db::open_connection(path)?;
        db::migrations::run_migrations(&conn, db::migrations::THUMBS_MIGRATIONS)?;
        Ok(ThumbSink {
            conn: Mutex::new(conn),
        })
    }

    pub fn write(&self, id: ImageId, size_name: &str, bytes: &[u8]) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO thumb (id, size_name, bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.0, size_name, bytes, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::from_sqlite("thumb_write", e))?;
        Ok(())
    }

    pub fn read(&self, id: ImageId, size_name: &str) -> Result<Vec<u8>> {
        self.conn
            .lock()
            .query_row(
                "SELECT bytes FROM thumb WHERE id = ?1 AND size_name = ?2",
                params![id.0, size_name],
                |row| row.get(0),
            )
            .map_err(|e| Error::from_sqlite("thumb_read", e))
    }

    pub fn contains(&self, id: ImageId, size_name: &str) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT 1 FROM thumb WHERE id = ?1 AND size_name = ?2",
                params![id.0, size_name],
                |_| Ok(()),
            )
            .optional()
            .ok()
            .flatten()
            .is_some()
    }

    /// Drop every stored size for an image. Called when the image leaves
    /// the catalog.
    pub fn delete(&self, id: ImageId) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM thumb WHERE id = ?1", params![id.0])
            .map_err(|e| Error::from_sqlite("thumb_delete", e))?;
        Ok(())
    }

    /// Any stored size for this image?
    pub fn contains_any(&self, id: ImageId) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT 1 FROM thumb WHERE id = ?1 LIMIT 1",
                params![id.0],
                |_| Ok(()),
            )
            .optional()
            .ok()
            .flatten()
            .is_some()
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("VACUUM")
            .map_err(|e| Error::from_sqlite("thumb_vacuum", e))
    }
}
