use crate::ai::Embedding;
use crate::catalog::batcher::{Batcher, WriteOp};
use crate::catalog::model::{
    dir_prefix, normalize_path, DirInfo, IdPath, ImageId, Info, ListOptions, ListOrder,
    MissingFlags, MissingInfo, SourcedInfo, WriteMode,
};
use crate::db;
use crate::error::{Error, Result};
use crate::stream::{produce, Cancel, Stream};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_IDLE_READERS: usize = 4;

/// The catalog: durable mapping of paths to ids with per-image metadata,
/// embeddings, and directory stamps, in a single SQLite file. One writer
/// (the batcher thread) and a small checkout pool of readers.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Inner>,
}

struct Inner {
    readers: ReaderPool,
    writer: Batcher,
    embedding_model: Option<String>,
}

struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn with<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = match self.idle.lock().pop() {
            Some(conn) => conn,
            None => db::open_connection(&self.path).map_err(Error::transient)?,
        };
        let out = f(&conn).map_err(|e| Error::from_sqlite(op, e));
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
        out
    }
}

impl Catalog {
    /// Open (creating if needed) a catalog database and apply pending
    /// migrations. `embedding_model` identifies the current embedding
    /// model for missing-embedding queries; `None` disables them.
    pub fn open(path: &Path, embedding_model: Option<String>) -> anyhow::Result<Catalog> {
        let conn = db::open_connection(path)?;
        db::migrations::run_migrations(&conn, db::migrations::CATALOG_MIGRATIONS)?;
        let writer = Batcher::spawn(path)?;
        tracing::info!("catalog open at {:?}", path);
        Ok(Catalog {
            inner: Arc::new(Inner {
                readers: ReaderPool {
                    path: path.to_path_buf(),
                    idle: Mutex::new(vec![conn]),
                },
                writer,
                embedding_model,
            }),
        })
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.inner.embedding_model.as_deref()
    }

    // ── Writes (all enqueue; the batcher commits) ─────────────────────────

    pub fn write(&self, path: &Path, info: Info, mode: WriteMode) {
        self.inner.writer.enqueue(WriteOp::Image {
            path: normalize_path(path),
            info,
            mode,
        });
    }

    pub fn delete(&self, id: ImageId) {
        self.inner.writer.enqueue(WriteOp::Delete { id });
    }

    pub fn write_embedding(&self, id: ImageId, embedding: Embedding) -> Result<()> {
        let model = self
            .inner
            .embedding_model
            .clone()
            .ok_or(Error::Unavailable("image embedding"))?;
        self.inner.writer.enqueue(WriteOp::Embedding {
            id,
            model,
            embedding,
        });
        Ok(())
    }

    /// Stamp the directory row as indexed now.
    pub fn set_indexed(&self, dir: &Path) {
        self.inner.writer.enqueue(WriteOp::SetIndexed {
            dir: dir_prefix(dir),
            at: Utc::now(),
        });
    }

    /// Block until every write enqueued before this call is committed.
    pub fn wait_for_commit(&self) {
        self.inner.writer.wait_for_commit();
    }

    pub fn vacuum(&self) -> Result<()> {
        self.inner
            .readers
            .with("vacuum", |conn| conn.execute_batch("VACUUM"))
    }

    // ── Point reads ───────────────────────────────────────────────────────

    pub fn get_id(&self, path: &Path) -> Result<ImageId> {
        let key = normalize_path(path);
        self.inner.readers.with("get_id", |conn| {
            conn.query_row(
                "SELECT id FROM path WHERE path = ?1 AND deleted = 0",
                params![key],
                |row| row.get::<_, u32>(0).map(ImageId),
            )
        })
    }

    pub fn get_path_from_id(&self, id: ImageId) -> Result<PathBuf> {
        self.inner.readers.with("get_path_from_id", |conn| {
            conn.query_row(
                "SELECT path FROM path WHERE id = ?1 AND deleted = 0",
                params![id.0],
                |row| row.get::<_, String>(0).map(PathBuf::from),
            )
        })
    }

    pub fn get_info(&self, id: ImageId) -> Result<Info> {
        self.inner.readers.with("get_info", |conn| {
            conn.query_row(
                "SELECT width, height, orientation, taken_at, color, lat, lon, location
                 FROM info WHERE id = ?1",
                params![id.0],
                info_from_row,
            )
        })
    }

    pub fn get_dir(&self, dir: &Path) -> Result<DirInfo> {
        let key = dir_prefix(dir);
        self.inner.readers.with("get_dir", |conn| {
            conn.query_row(
                "SELECT path, indexed_at FROM dir WHERE path = ?1",
                params![key],
                |row| {
                    let path: String = row.get(0)?;
                    let indexed_at: Option<String> = row.get(1)?;
                    Ok(DirInfo {
                        path: PathBuf::from(path),
                        indexed_at: indexed_at
                            .as_deref()
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|dt| dt.with_timezone(&Utc)),
                    })
                },
            )
        })
    }

    /// Count of live rows under any of `dirs`.
    pub fn get_dirs_count(&self, dirs: &[PathBuf]) -> Result<u64> {
        self.inner.readers.with("get_dirs_count", |conn| {
            let mut stmt = conn.prepare(
                "SELECT COUNT(*) FROM path WHERE deleted = 0 AND path LIKE ?1 || '%'",
            )?;
            let mut total: u64 = 0;
            for dir in dirs {
                total += stmt.query_row(params![dir_prefix(dir)], |row| row.get::<_, u64>(0))?;
            }
            Ok(total)
        })
    }

    pub fn get_image_embedding(&self, id: ImageId) -> Result<Embedding> {
        let model = self
            .inner
            .embedding_model
            .as_deref()
            .ok_or(Error::Unavailable("image embedding"))?
            .to_string();
        let (inv_norm, blob) = self.inner.readers.with("get_image_embedding", |conn| {
            conn.query_row(
                "SELECT inv_norm, vec FROM embedding WHERE id = ?1 AND model = ?2",
                params![id.0, model],
                |row| Ok((row.get::<_, f32>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
        })?;
        Embedding::from_bytes(&blob, inv_norm)
    }

    // ── Lazy listings ─────────────────────────────────────────────────────

    /// Every live path under any of `dirs`, capped at `max` per root
    /// (0 = unbounded), in catalog-insertion order.
    pub fn list_paths(&self, dirs: &[PathBuf], max: usize, cancel: &Cancel) -> Stream<PathBuf> {
        let catalog = self.clone();
        let prefixes: Vec<String> = dirs.iter().map(|d| dir_prefix(d)).collect();
        produce("list-paths", cancel, move |out| {
            let result = catalog.inner.readers.with("list_paths", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path FROM path WHERE deleted = 0 AND path LIKE ?1 || '%'
                     ORDER BY id ASC LIMIT ?2",
                )?;
                for prefix in &prefixes {
                    let rows =
                        stmt.query_map(params![prefix, limit_param(max)], |row| {
                            row.get::<_, String>(0)
                        })?;
                    for row in rows {
                        if !out.send(PathBuf::from(row?)) {
                            return Ok(());
                        }
                    }
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::warn!("list_paths: {}", e);
            }
        })
    }

    /// Ids under `dirs`. With `missing_embedding_only`, only ids without
    /// an embedding row for the current model; nothing is emitted when no
    /// model is configured.
    pub fn list_ids(
        &self,
        dirs: &[PathBuf],
        max: usize,
        missing_embedding_only: bool,
        cancel: &Cancel,
    ) -> Stream<ImageId> {
        let catalog = self.clone();
        let prefixes: Vec<String> = dirs.iter().map(|d| dir_prefix(d)).collect();
        produce("list-ids", cancel, move |out| {
            let model = catalog.inner.embedding_model.clone();
            if missing_embedding_only && model.is_none() {
                return;
            }
            let result = catalog.inner.readers.with("list_ids", |conn| {
                let mut stmt = if missing_embedding_only {
                    conn.prepare(
                        "SELECT p.id FROM path p
                         LEFT JOIN embedding e ON e.id = p.id AND e.model = ?3
                         WHERE p.deleted = 0 AND p.path LIKE ?1 || '%' AND e.id IS NULL
                         ORDER BY p.id ASC LIMIT ?2",
                    )?
                } else {
                    conn.prepare(
                        "SELECT id FROM path
                         WHERE deleted = 0 AND path LIKE ?1 || '%'
                         ORDER BY id ASC LIMIT ?2",
                    )?
                };
                for prefix in &prefixes {
                    let rows: Box<dyn Iterator<Item = rusqlite::Result<u32>>> =
                        if missing_embedding_only {
                            Box::new(stmt.query_map(
                                params![prefix, limit_param(max), model.as_deref()],
                                |row| row.get::<_, u32>(0),
                            )?)
                        } else {
                            Box::new(stmt.query_map(params![prefix, limit_param(max)], |row| {
                                row.get::<_, u32>(0)
                            })?)
                        };
                    for row in rows {
                        if !out.send(ImageId(row?)) {
                            return Ok(());
                        }
                    }
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::warn!("list_ids: {}", e);
            }
        })
    }

    /// Listing rows ordered per `options`. Equal timestamps fall back to
    /// id order so pagination stays stable.
    pub fn list(&self, dirs: &[PathBuf], options: ListOptions, cancel: &Cancel) -> Stream<SourcedInfo> {
        let catalog = self.clone();
        let prefixes: Vec<String> = dirs.iter().map(|d| dir_prefix(d)).collect();
        produce("list", cancel, move |out| {
            let result = match &options.order {
                ListOrder::Similarity(reference) => {
                    catalog.list_by_similarity(&prefixes, &options, reference, out)
                }
                _ => catalog.list_by_sql(&prefixes, &options, out),
            };
            if let Err(e) = result {
                tracing::warn!("list: {}", e);
            }
        })
    }

    fn list_by_sql(
        &self,
        prefixes: &[String],
        options: &ListOptions,
        out: &crate::stream::Emitter<SourcedInfo>,
    ) -> Result<()> {
        let order_clause = match options.order {
            ListOrder::DateAsc => "i.taken_at ASC, p.id ASC",
            ListOrder::DateDesc => "i.taken_at DESC, p.id ASC",
            ListOrder::Path => "p.path ASC",
            ListOrder::Similarity(_) => unreachable!("handled by list_by_similarity"),
        };
        let (prefix_clause, mut values) = prefix_filter(prefixes);
        let date_clause = match &options.date_range {
            Some((from, to)) => {
                values.push(Box::new(from.timestamp()));
                values.push(Box::new(to.timestamp()));
                format!(
                    " AND i.taken_at >= ?{} AND i.taken_at <= ?{}",
                    values.len() - 1,
                    values.len()
                )
            }
            None => String::new(),
        };
        values.push(Box::new(limit_param(options.limit)));
        let sql = format!(
            "SELECT p.id, i.width, i.height, i.orientation, i.taken_at, i.color, i.lat, i.lon, i.location
             FROM path p JOIN info i ON i.id = p.id
             WHERE p.deleted = 0 AND ({}){}
             ORDER BY {} LIMIT ?{}",
            prefix_clause,
            date_clause,
            order_clause,
            values.len(),
        );
        self.inner.readers.with("list", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), |row| {
                let id: u32 = row.get(0)?;
                let info = info_from_offset_row(row, 1)?;
                Ok(SourcedInfo {
                    id: ImageId(id),
                    info,
                })
            })?;
            for row in rows {
                if !out.send(row?) {
                    break;
                }
            }
            Ok(())
        })
    }

    fn list_by_similarity(
        &self,
        prefixes: &[String],
        options: &ListOptions,
        reference: &Embedding,
        out: &crate::stream::Emitter<SourcedInfo>,
    ) -> Result<()> {
        let model = self
            .inner
            .embedding_model
            .as_deref()
            .ok_or(Error::Unavailable("image embedding"))?
            .to_string();
        let (prefix_clause, mut values) = prefix_filter(prefixes);
        values.push(Box::new(model));
        let sql = format!(
            "SELECT p.id, e.inv_norm, e.vec FROM path p
             JOIN embedding e ON e.id = p.id AND e.model = ?{}
             WHERE p.deleted = 0 AND ({})",
            values.len(),
            prefix_clause,
        );
        let mut scored: Vec<(ImageId, f32)> = self.inner.readers.with("list_similarity", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, f32>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;
            let mut scored = Vec::new();
            for row in rows {
                let (id, inv_norm, blob) = row?;
                if let Ok(embedding) = Embedding::from_bytes(&blob, inv_norm) {
                    scored.push((ImageId(id), reference.cosine(&embedding)));
                }
            }
            Ok(scored)
        })?;
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        if options.limit > 0 {
            scored.truncate(options.limit);
        }
        for (id, _) in scored {
            if out.is_cancelled() {
                break;
            }
            match self.get_info(id) {
                Ok(info) => {
                    if !out.send(SourcedInfo { id, info }) {
                        break;
                    }
                }
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Work orders for every row under `dirs` with any of the requested
    /// facets unsatisfied: metadata (zero width or epoch timestamp),
    /// color (zero), embedding (no row for the current model).
    pub fn list_missing(
        &self,
        dirs: &[PathBuf],
        max: usize,
        flags: MissingFlags,
        cancel: &Cancel,
    ) -> Stream<MissingInfo> {
        let catalog = self.clone();
        let prefixes: Vec<String> = dirs.iter().map(|d| dir_prefix(d)).collect();
        produce("list-missing", cancel, move |out| {
            let model = catalog.inner.embedding_model.clone();
            let want_embedding = flags.embedding && model.is_some();
            let result = catalog.inner.readers.with("list_missing", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.path, i.width, i.taken_at, i.color,
                            (CASE WHEN e.id IS NULL THEN 1 ELSE 0 END)
                     FROM path p JOIN info i ON i.id = p.id
                     LEFT JOIN embedding e ON e.id = p.id AND e.model = ?3
                     WHERE p.deleted = 0 AND p.path LIKE ?1 || '%'
                     ORDER BY p.id ASC LIMIT ?2",
                )?;
                let anchor = model.clone().unwrap_or_else(|| "-".into());
                for prefix in &prefixes {
                    let rows = stmt.query_map(
                        params![prefix, limit_param(max), anchor],
                        |row| {
                            Ok((
                                row.get::<_, u32>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, u32>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, u32>(4)?,
                                row.get::<_, i64>(5)? != 0,
                            ))
                        },
                    )?;
                    for row in rows {
                        let (id, path, width, taken_at, color, no_embedding) = row?;
                        let missing = MissingFlags {
                            metadata: flags.metadata && (width == 0 || taken_at == 0),
                            color: flags.color && color == 0,
                            embedding: want_embedding && no_embedding,
                        };
                        if !missing.any() {
                            continue;
                        }
                        let item = MissingInfo {
                            id: ImageId(id),
                            path: PathBuf::from(path),
                            missing,
                        };
                        if !out.send(item) {
                            return Ok(());
                        }
                    }
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::warn!("list_missing: {}", e);
            }
        })
    }

    /// Every live row under `dir` whose path was not observed during the
    /// latest walk of that root.
    pub fn delete_nonexistent(
        &self,
        dir: &Path,
        observed: HashSet<String>,
        cancel: &Cancel,
    ) -> Stream<IdPath> {
        let catalog = self.clone();
        let prefix = dir_prefix(dir);
        produce("delete-nonexistent", cancel, move |out| {
            let result = catalog.inner.readers.with("delete_nonexistent", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, path FROM path WHERE deleted = 0 AND path LIKE ?1 || '%'
                     ORDER BY id ASC",
                )?;
                let rows = stmt.query_map(params![prefix], |row| {
                    Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (id, path) = row?;
                    if observed.contains(&path) {
                        continue;
                    }
                    let item = IdPath {
                        id: ImageId(id),
                        path: PathBuf::from(path),
                    };
                    if !out.send(item) {
                        break;
                    }
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::warn!("delete_nonexistent: {}", e);
            }
        })
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn limit_param(max: usize) -> i64 {
    if max == 0 {
        -1
    } else {
        max as i64
    }
}

/// Build `(p.path LIKE ?1 || '%' OR ...)` with its bound values.
fn prefix_filter(prefixes: &[String]) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    let mut clauses: Vec<String> = Vec::new();
    for prefix in prefixes {
        values.push(Box::new(prefix.clone()));
        clauses.push(format!("p.path LIKE ?{} || '%'", values.len()));
    }
    if clauses.is_empty() {
        // No dirs means no rows, not all rows.
        clauses.push("0".into());
    }
    (clauses.join(" OR "), values)
}

fn info_from_row(row: &Row<'_>) -> rusqlite::Result<Info> {
    info_from_offset_row(row, 0)
}

fn info_from_offset_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Info> {
    Ok(Info {
        width: row.get(base)?,
        height: row.get(base + 1)?,
        orientation: row.get(base + 2)?,
        taken_at: Utc
            .timestamp_opt(row.get::<_, i64>(base + 3)?, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
        color: row.get(base + 4)?,
        lat: row.get(base + 5)?,
        lon: row.get(base + 6)?,
        location: row.get(base + 7)?,
    })
}
