//! Root indexing orchestration: walk a directory, record every sighting
//! in the catalog, stamp the directory, propagate deletions (catalog and
//! thumbnail sink), then hand the remaining work orders to the queues.

use crate::catalog::{Catalog, ImageId, Info, MissingFlags, MissingInfo, ThumbSink, WriteMode};
use crate::error::Result;
use crate::index::queue::Queue;
use crate::stream::Cancel;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub files_seen: usize,
    pub deleted: usize,
    pub queued_metadata: usize,
    pub queued_contents: usize,
}

pub struct Indexer {
    catalog: Catalog,
    sink: Arc<ThumbSink>,
    extensions: Vec<String>,
    metadata_queue: Option<Arc<Queue<MissingInfo>>>,
    contents_queue: Option<Arc<Queue<MissingInfo>>>,
}

impl Indexer {
    pub fn new(
        catalog: Catalog,
        sink: Arc<ThumbSink>,
        extensions: Vec<String>,
        metadata_queue: Option<Arc<Queue<MissingInfo>>>,
        contents_queue: Option<Arc<Queue<MissingInfo>>>,
    ) -> Indexer {
        Indexer {
            catalog,
            sink,
            extensions,
            metadata_queue,
            contents_queue,
        }
    }

    /// Index one root: every matching file gets an APPEND write (new
    /// paths are assigned ids, known paths are untouched), rows whose
    /// files disappeared are deleted along with their sink entries, and
    /// unsatisfied work orders go to the queues.
    pub fn index_files(&self, dir: &Path, max: usize, cancel: &Cancel) -> Result<IndexStats> {
        let mut stats = IndexStats::default();

        let walk = crate::index::walk::walk(dir, &self.extensions, max, cancel)?;
        let mut observed: HashSet<String> = HashSet::new();
        for path in walk {
            self.catalog.write(&path, Info::default(), WriteMode::Append);
            observed.insert(crate::catalog::model::normalize_path(&path));
            stats.files_seen += 1;
        }
        self.catalog.wait_for_commit();

        // A partial walk must not be mistaken for deletions, and does
        // not count as having indexed the directory.
        if cancel.is_cancelled() {
            return Ok(stats);
        }
        self.catalog.set_indexed(dir);

        let stale = self.catalog.delete_nonexistent(dir, observed, cancel);
        let mut doomed: Vec<ImageId> = Vec::new();
        for id_path in stale {
            tracing::debug!("gone from disk: {:?} ({})", id_path.path, id_path.id);
            doomed.push(id_path.id);
        }
        for id in doomed {
            self.catalog.delete(id);
            if let Err(e) = self.sink.delete(id) {
                tracing::warn!("sink delete {}: {}", id, e);
            }
            stats.deleted += 1;
        }
        self.catalog.wait_for_commit();

        self.enqueue_missing(dir, cancel, &mut stats);
        tracing::info!(
            "indexed {:?}: {} file(s), {} deleted, {} metadata / {} contents queued",
            dir,
            stats.files_seen,
            stats.deleted,
            stats.queued_metadata,
            stats.queued_contents,
        );
        Ok(stats)
    }

    fn enqueue_missing(&self, dir: &Path, cancel: &Cancel, stats: &mut IndexStats) {
        let dirs = [dir.to_path_buf()];
        if let Some(queue) = &self.metadata_queue {
            let missing = self.catalog.list_missing(
                &dirs,
                0,
                MissingFlags {
                    metadata: true,
                    ..MissingFlags::default()
                },
                cancel,
            );
            for item in missing {
                queue.append_one(item);
                stats.queued_metadata += 1;
            }
        }
        if let Some(queue) = &self.contents_queue {
            let missing = self.catalog.list_missing(
                &dirs,
                0,
                MissingFlags {
                    color: true,
                    embedding: true,
                    ..MissingFlags::default()
                },
                cancel,
            );
            for item in missing {
                queue.append_one(item);
                stats.queued_contents += 1;
            }
        }
    }
}
