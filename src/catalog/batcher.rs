//! Write coalescing for the catalog. All durable mutations funnel through
//! one committer thread owning the single writer connection; callers only
//! enqueue. Batches close on size or on a delay timer, whichever first.

use crate::ai::Embedding;
use crate::catalog::model::{ImageId, Info, WriteMode};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const QUEUE_CAPACITY: usize = 4096;
const BATCH_SIZE: usize = 1024;
const BATCH_DELAY: Duration = Duration::from_millis(250);
const IDLE_POLL: Duration = Duration::from_secs(3600);

pub(crate) enum WriteOp {
    Image {
        path: String,
        info: Info,
        mode: WriteMode,
    },
    Embedding {
        id: ImageId,
        model: String,
        embedding: Embedding,
    },
    Delete {
        id: ImageId,
    },
    SetIndexed {
        dir: String,
        at: DateTime<Utc>,
    },
    Flush {
        ack: Sender<()>,
    },
}

pub(crate) struct Batcher {
    tx: Option<Sender<WriteOp>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Batcher {
    pub(crate) fn spawn(db_path: &Path) -> anyhow::Result<Batcher> {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let db_path: PathBuf = db_path.to_path_buf();
        let handle = std::thread::Builder::new()
            .name("catalog-writer".into())
            .spawn(move || match crate::db::open_connection(&db_path) {
                Ok(conn) => run(conn, rx),
                Err(e) => {
                    tracing::error!("catalog writer cannot open {:?}: {}", db_path, e);
                }
            })?;
        Ok(Batcher {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Enqueue a mutation. Never fails synchronously; blocks only when the
    /// queue is full (backpressure).
    pub(crate) fn enqueue(&self, op: WriteOp) {
        if let Some(tx) = &self.tx {
            if tx.send(op).is_err() {
                tracing::error!("catalog writer is gone; write dropped");
            }
        }
    }

    /// Block until everything enqueued before this call is committed.
    pub(crate) fn wait_for_commit(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        self.enqueue(WriteOp::Flush { ack: ack_tx });
        let _ = ack_rx.recv();
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        // Closing the channel signals shutdown; the committer drains
        // through one last commit before exiting.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Committer loop: idle until the first write arrives, collect until the
/// batch fills or the delay elapses, then commit and go idle again.
fn run(conn: Connection, rx: Receiver<WriteOp>) {
    let mut batch: Vec<WriteOp> = Vec::new();
    let mut acks: Vec<Sender<()>> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let timeout = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => IDLE_POLL,
        };
        match rx.recv_timeout(timeout) {
            Ok(WriteOp::Flush { ack }) => {
                acks.push(ack);
                commit(&conn, &mut batch, &mut acks);
                deadline = None;
            }
            Ok(op) => {
                if batch.is_empty() {
                    deadline = Some(Instant::now() + BATCH_DELAY);
                }
                batch.push(op);
                if batch.len() >= BATCH_SIZE {
                    commit(&conn, &mut batch, &mut acks);
                    deadline = None;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    commit(&conn, &mut batch, &mut acks);
                }
                deadline = None;
            }
            Err(RecvTimeoutError::Disconnected) => {
                commit(&conn, &mut batch, &mut acks);
                return;
            }
        }
    }
}

/// Commit the batch, retrying transient failures with exponential backoff
/// until the batch lands. Integrity failures are fatal.
fn commit(conn: &Connection, batch: &mut Vec<WriteOp>, acks: &mut Vec<Sender<()>>) {
    if !batch.is_empty() {
        let policy = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        let result = backoff::retry(policy, || {
            apply_batch(conn, batch).map_err(|e| {
                if is_corruption(&e) {
                    tracing::error!("catalog integrity failure during commit: {}", e);
                    std::process::abort();
                }
                tracing::warn!("catalog commit failed, retrying: {}", e);
                backoff::Error::transient(e)
            })
        });
        if result.is_ok() {
            tracing::debug!("committed {} catalog write(s)", batch.len());
        }
        batch.clear();
    }
    for ack in acks.drain(..) {
        let _ = ack.send(());
    }
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi::ErrorCode;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

fn apply_batch(conn: &Connection, batch: &[WriteOp]) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for op in batch {
        match op {
            WriteOp::Image { path, info, mode } => apply_image(&tx, path, info, *mode)?,
            WriteOp::Embedding {
                id,
                model,
                embedding,
            } => {
                tx.execute(
                    "INSERT OR REPLACE INTO embedding (id, model, inv_norm, vec)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id.0, model, embedding.inv_norm(), embedding.to_bytes()],
                )?;
            }
            WriteOp::Delete { id } => {
                // Tombstone: the path row stays so the id is never reused.
                tx.execute("UPDATE path SET deleted = 1 WHERE id = ?1", params![id.0])?;
                tx.execute("DELETE FROM info WHERE id = ?1", params![id.0])?;
                tx.execute("DELETE FROM embedding WHERE id = ?1", params![id.0])?;
            }
            WriteOp::SetIndexed { dir, at } => {
                tx.execute(
                    "INSERT INTO dir (path, indexed_at) VALUES (?1, ?2)
                     ON CONFLICT(path) DO UPDATE SET indexed_at = excluded.indexed_at",
                    params![dir, at.to_rfc3339()],
                )?;
            }
            WriteOp::Flush { .. } => unreachable!("flush is handled before batching"),
        }
    }
    tx.commit()
}

fn apply_image(
    tx: &rusqlite::Transaction<'_>,
    path: &str,
    info: &Info,
    mode: WriteMode,
) -> rusqlite::Result<()> {
    tx.execute("INSERT OR IGNORE INTO path (path) VALUES (?1)", params![path])?;
    let inserted_path = tx.changes() > 0;
    if !inserted_path {
        // A path seen again after deletion gets its old id back.
        tx.execute(
            "UPDATE path SET deleted = 0 WHERE path = ?1 AND deleted = 1",
            params![path],
        )?;
    }
    tx.execute(
        "INSERT OR IGNORE INTO info (id) SELECT id FROM path WHERE path = ?1",
        params![path],
    )?;
    let inserted_info = tx.changes() > 0;

    match mode {
        WriteMode::Append => {
            // Insert-only: existing rows keep their data; a fresh row takes
            // whatever non-default fields came with the write.
            if inserted_info {
                merge_info(tx, path, info)?;
            }
        }
        WriteMode::Merge => merge_info(tx, path, info)?,
        WriteMode::Update => {
            tx.execute(
                "UPDATE info SET width = ?2, height = ?3, orientation = ?4, taken_at = ?5,
                        color = ?6, lat = ?7, lon = ?8, location = ?9
                 WHERE id = (SELECT id FROM path WHERE path = ?1)",
                params![
                    path,
                    info.width,
                    info.height,
                    info.orientation,
                    info.taken_at.timestamp(),
                    info.color,
                    info.lat,
                    info.lon,
                    info.location,
                ],
            )?;
        }
    }
    Ok(())
}

/// Overwrite only the non-default fields of `info`.
fn merge_info(tx: &rusqlite::Transaction<'_>, path: &str, info: &Info) -> rusqlite::Result<()> {
    // ?1 is the path; every field claims the next ordinal as it is bound.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(path.to_string())];
    let mut bind = |column: &str, value: Box<dyn rusqlite::ToSql>| {
        values.push(value);
        sets.push(format!("{} = ?{}", column, values.len()));
    };
    if info.width != 0 {
        bind("width", Box::new(info.width));
    }
    if info.height != 0 {
        bind("height", Box::new(info.height));
    }
    if info.orientation != 0 {
        bind("orientation", Box::new(info.orientation));
    }
    if info.taken_at.timestamp() != 0 {
        bind("taken_at", Box::new(info.taken_at.timestamp()));
    }
    if info.color != 0 {
        bind("color", Box::new(info.color));
    }
    if let Some(lat) = info.lat {
        bind("lat", Box::new(lat));
    }
    if let Some(lon) = info.lon {
        bind("lon", Box::new(lon));
    }
    if let Some(location) = &info.location {
        bind("location", Box::new(location.clone()));
    }
    if sets.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "UPDATE info SET {} WHERE id = (SELECT id FROM path WHERE path = ?1)",
        sets.join(", ")
    );
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    tx.execute(&sql, refs.as_slice())?;
    Ok(())
}
