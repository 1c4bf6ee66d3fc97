//! Append-only migration chains for the catalog and the thumbnail sink.
//! Each entry runs in its own transaction and is recorded in the
//! `migrations` table; already-applied versions are skipped on open.

use rusqlite::Connection;

/// Catalog schema (`*.cache.db`). New migrations go at the end; never
/// edit a shipped entry.
pub const CATALOG_MIGRATIONS: &[&str] = &[
    // 1: core path/info tables.
    "
    CREATE TABLE path (
        id      INTEGER PRIMARY KEY,
        path    TEXT NOT NULL UNIQUE,
        deleted INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE info (
        id          INTEGER PRIMARY KEY REFERENCES path(id),
        width       INTEGER NOT NULL DEFAULT 0,
        height      INTEGER NOT NULL DEFAULT 0,
        orientation INTEGER NOT NULL DEFAULT 0,
        taken_at    INTEGER NOT NULL DEFAULT 0,
        color       INTEGER NOT NULL DEFAULT 0,
        lat         REAL,
        lon         REAL,
        location    TEXT
    );

    CREATE INDEX idx_info_taken_at ON info(taken_at);
    ",
    // 2: directory rows with their index stamps.
    "
    CREATE TABLE dir (
        path       TEXT PRIMARY KEY,
        indexed_at TEXT
    );
    ",
    // 3: embeddings, keyed by (image, model) so a model upgrade re-indexes
    // without clobbering the previous model's vectors.
    "
    CREATE TABLE embedding (
        id       INTEGER NOT NULL REFERENCES path(id),
        model    TEXT NOT NULL,
        inv_norm REAL NOT NULL,
        vec      BLOB NOT NULL,
        PRIMARY KEY (id, model)
    );
    ",
    // 4: tags with compressed id sets.
    "
    CREATE TABLE tag (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        rev  INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE tag_ids (
        tag_id INTEGER PRIMARY KEY REFERENCES tag(id),
        blob   BLOB NOT NULL
    );
    ",
];

/// Thumbnail sink schema (`*.thumbs.db`).
pub const THUMBS_MIGRATIONS: &[&str] = &[
    "
    CREATE TABLE thumb (
        id         INTEGER NOT NULL,
        size_name  TEXT NOT NULL,
        bytes      BLOB NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (id, size_name)
    );
    ",
];

/// Apply every migration past the recorded version, in order.
pub fn run_migrations(conn: &Connection, migrations: &[&str]) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    let applied = schema_version(conn)?;
    for (idx, script) in migrations.iter().enumerate() {
        let version = (idx + 1) as u32;
        if version <= applied {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(script)?;
        tx.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        tracing::debug!("applied migration {}", version);
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> anyhow::Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}
