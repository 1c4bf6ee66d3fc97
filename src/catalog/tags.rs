//! Tag engine: each tag owns a compressed sorted set of image ids and a
//! revision counter that increases on every mutation. Bitmaps live in
//! memory behind per-tag locks and are persisted on each mutation, so a
//! revision a caller saw can never roll back.

use crate::catalog::model::ImageId;
use crate::db;
use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub revision: u64,
}

pub struct TagEngine {
    // Mutations serialize on this connection; reads go through it too
    // since tag traffic is light compared to image listings.
    conn: Mutex<Connection>,
    bitmaps: DashMap<TagId, Arc<RwLock<RoaringBitmap>>>,
}

impl TagEngine {
    /// The engine shares the catalog database file; the tag tables come
    /// from the catalog migration chain.
    pub fn open(catalog_db: &Path) -> anyhow::Result<TagEngine> {
        let conn = db::open_connection(catalog_db)?;
        db::migrations::run_migrations(&conn, db::migrations::CATALOG_MIGRATIONS)?;
        Ok(TagEngine {
            conn: Mutex::new(conn),
            bitmaps: DashMap::new(),
        })
    }

    /// Create a tag, or return the existing one unchanged (idempotent by
    /// name). A fresh tag starts at revision 1.
    pub fn add_tag(&self, name: &str) -> Result<Tag> {
        let conn = self.conn.lock();
        if let Some(tag) = get_tag_row(&conn, name)? {
            return Ok(tag);
        }
        conn.execute(
            "INSERT INTO tag (name, rev) VALUES (?1, 1)",
            params![name],
        )
        .map_err(|e| Error::from_sqlite("add_tag", e))?;
        let id = TagId(conn.last_insert_rowid() as u32);
        conn.execute(
            "INSERT INTO tag_ids (tag_id, blob) VALUES (?1, ?2)",
            params![id.0, serialize(&RoaringBitmap::new())],
        )
        .map_err(|e| Error::from_sqlite("add_tag", e))?;
        Ok(Tag {
            id,
            name: name.to_string(),
            revision: 1,
        })
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Tag> {
        let conn = self.conn.lock();
        get_tag_row(&conn, name)?.ok_or(Error::NotFound)
    }

    pub fn get_tag_id(&self, name: &str) -> Result<TagId> {
        self.get_tag_by_name(name).map(|t| t.id)
    }

    /// Set-union `ids` into the tag. Returns the new revision.
    pub fn add_tag_ids(&self, tag_id: TagId, ids: &[ImageId]) -> Result<u64> {
        self.mutate(tag_id, |bitmap| {
            for id in ids {
                bitmap.insert(id.0);
            }
        })
    }

    /// Set-difference `ids` out of the tag. Returns the new revision.
    pub fn remove_tag_ids(&self, tag_id: TagId, ids: &[ImageId]) -> Result<u64> {
        self.mutate(tag_id, |bitmap| {
            for id in ids {
                bitmap.remove(id.0);
            }
        })
    }

    /// Toggle membership of every id in `ids`. Applying the same set
    /// twice restores the starting bitmap.
    pub fn invert_tag_ids(&self, tag_id: TagId, ids: &[ImageId]) -> Result<u64> {
        self.mutate(tag_id, |bitmap| {
            for id in ids {
                if !bitmap.remove(id.0) {
                    bitmap.insert(id.0);
                }
            }
        })
    }

    /// A copy of the tag's full id set.
    pub fn get_tag_image_ids(&self, tag_id: TagId) -> Result<RoaringBitmap> {
        let bitmap = self.load_bitmap(tag_id)?;
        let snapshot = bitmap.read().clone();
        Ok(snapshot)
    }

    /// All tags whose set contains `id`, in tag-id order.
    pub fn list_image_tags(&self, id: ImageId) -> Result<Vec<Tag>> {
        let all = self.list_tags("", 0)?;
        let mut out = Vec::new();
        for tag in all {
            let bitmap = self.load_bitmap(tag.id)?;
            if bitmap.read().contains(id.0) {
                out.push(tag);
            }
        }
        Ok(out)
    }

    /// Tags whose name starts with `prefix`, name order, capped at
    /// `limit` (0 = unbounded).
    pub fn list_tags(&self, prefix: &str, limit: usize) -> Result<Vec<Tag>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, rev FROM tag WHERE name LIKE ?1 || '%'
                 ORDER BY name ASC LIMIT ?2",
            )
            .map_err(|e| Error::from_sqlite("list_tags", e))?;
        let limit = if limit == 0 { -1i64 } else { limit as i64 };
        let rows = stmt
            .query_map(params![prefix, limit], |row| {
                Ok(Tag {
                    id: TagId(row.get(0)?),
                    name: row.get(1)?,
                    revision: row.get(2)?,
                })
            })
            .map_err(|e| Error::from_sqlite("list_tags", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| Error::from_sqlite("list_tags", e))?);
        }
        Ok(out)
    }

    /// Apply a bitmap mutation and persist it together with the revision
    /// bump in one transaction. The per-tag write lock spans both, so
    /// revisions for one tag are strictly monotonic; other tags proceed
    /// independently.
    fn mutate(&self, tag_id: TagId, f: impl FnOnce(&mut RoaringBitmap)) -> Result<u64> {
        let bitmap = self.load_bitmap(tag_id)?;
        let mut guard = bitmap.write();
        f(&mut guard);
        let blob = serialize(&guard);

        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::from_sqlite("tag_mutate", e))?;
        tx.execute(
            "UPDATE tag SET rev = rev + 1 WHERE id = ?1",
            params![tag_id.0],
        )
        .map_err(|e| Error::from_sqlite("tag_mutate", e))?;
        tx.execute(
            "INSERT OR REPLACE INTO tag_ids (tag_id, blob) VALUES (?1, ?2)",
            params![tag_id.0, blob],
        )
        .map_err(|e| Error::from_sqlite("tag_mutate", e))?;
        let revision: u64 = tx
            .query_row(
                "SELECT rev FROM tag WHERE id = ?1",
                params![tag_id.0],
                |row| row.get(0),
            )
            .map_err(|e| Error::from_sqlite("tag_mutate", e))?;
        tx.commit().map_err(|e| Error::from_sqlite("tag_mutate", e))?;
        Ok(revision)
    }

    fn load_bitmap(&self, tag_id: TagId) -> Result<Arc<RwLock<RoaringBitmap>>> {
        if let Some(bitmap) = self.bitmaps.get(&tag_id) {
            return Ok(bitmap.clone());
        }
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT blob FROM tag_ids WHERE tag_id = ?1",
                params![tag_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::from_sqlite("load_tag_ids", e))?;
        let blob = blob.ok_or(Error::NotFound)?;
        let bitmap = RoaringBitmap::deserialize_from(&blob[..])
            .map_err(|e| Error::transient(anyhow::anyhow!("tag bitmap blob: {}", e)))?;
        let entry = self
            .bitmaps
            .entry(tag_id)
            .or_insert_with(|| Arc::new(RwLock::new(bitmap)));
        Ok(entry.clone())
    }
}

fn serialize(bitmap: &RoaringBitmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(bitmap.serialized_size());
    bitmap
        .serialize_into(&mut out)
        .expect("serializing into a Vec cannot fail");
    out
}

fn get_tag_row(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    conn.query_row(
        "SELECT id, name, rev FROM tag WHERE name = ?1",
        params![name],
        |row| {
            Ok(Tag {
                id: TagId(row.get(0)?),
                name: row.get(1)?,
                revision: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| Error::from_sqlite("get_tag", e))
}
