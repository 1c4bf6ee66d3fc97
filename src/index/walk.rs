//! Lazy recursive directory enumeration. Hidden entries are skipped
//! (except the root itself), extensions are matched case-insensitively,
//! symlinked directories are followed once with a canonicalized-path
//! guard, and per-entry errors log and continue. Only an unreadable
//! root fails the enumeration.

use crate::error::Result;
use crate::sources::files::extension_matches;
use crate::stream::{produce, Cancel, Stream};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Enumerate image files under `root`. `max` caps the yield
/// (0 = unbounded).
pub fn walk(
    root: &Path,
    extensions: &[String],
    max: usize,
    cancel: &Cancel,
) -> Result<Stream<PathBuf>> {
    // Probe the root eagerly so a missing or unreadable root fails the
    // call instead of producing a silently empty stream.
    std::fs::read_dir(root)?;

    let root = root.to_path_buf();
    let extensions = extensions.to_vec();
    Ok(produce("walk", cancel, move |out| {
        let mut followed: HashSet<PathBuf> = HashSet::new();
        if let Ok(canonical) = root.canonicalize() {
            followed.insert(canonical);
        }
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() > 0 && is_hidden(entry) {
                    return false;
                }
                if entry.depth() > 0 && entry.file_type().is_dir() {
                    // Descend into each real directory once, however many
                    // links point at it.
                    match entry.path().canonicalize() {
                        Ok(canonical) => return followed.insert(canonical),
                        Err(e) => {
                            tracing::warn!("cannot canonicalize {:?}: {}", entry.path(), e);
                            return false;
                        }
                    }
                }
                true
            });

        let mut yielded: usize = 0;
        for entry in walker {
            if out.is_cancelled() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("walk: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if !extension_matches(entry.path(), &extensions) {
                continue;
            }
            if !out.send(entry.into_path()) {
                return;
            }
            yielded += 1;
            if max > 0 && yielded >= max {
                return;
            }
        }
    }))
}
