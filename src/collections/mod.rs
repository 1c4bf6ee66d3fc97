//! A collection names a group of root directories that browse as one
//! unit. With `expand_subdirs` it splits into one child collection per
//! immediate subdirectory, which is how "one album per folder" layouts
//! are served.

pub mod slug;

use crate::catalog::{Catalog, ImageId};
use crate::config::{CollectionConfig, ExpandSort};
use crate::error::{Error, Result};
use crate::stream::{produce, Cancel, Stream};
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub list_limit: usize,
    pub expand_subdirs: bool,
    pub expand_sort: ExpandSort,
    pub dirs: Vec<PathBuf>,
}

impl Collection {
    pub fn new(name: &str, dirs: Vec<PathBuf>) -> Collection {
        Collection {
            id: slug::generate_slug(name, &[]),
            name: name.to_string(),
            list_limit: 0,
            expand_subdirs: false,
            expand_sort: ExpandSort::Default,
            dirs,
        }
    }

    pub fn from_config(config: &CollectionConfig) -> Collection {
        Collection {
            id: slug::generate_slug(&config.name, &[]),
            name: config.name.clone(),
            list_limit: config.list_limit,
            expand_subdirs: config.expand_subdirs,
            expand_sort: config.expand_sort.clone(),
            dirs: config.dirs.clone(),
        }
    }

    /// Child collections, one per immediate subdirectory of each root,
    /// each inheriting `list_limit`. An unreadable root fails the whole
    /// expansion.
    pub fn expand(&self) -> Result<Vec<Collection>> {
        let mut subdirs: Vec<PathBuf> = Vec::new();
        for root in &self.dirs {
            let entries = std::fs::read_dir(root)?;
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    subdirs.push(entry.path());
                }
            }
        }
        match self.expand_sort {
            ExpandSort::Asc => subdirs.sort(),
            ExpandSort::Desc => {
                subdirs.sort();
                subdirs.reverse();
            }
            ExpandSort::Default => {}
        }

        let mut children = Vec::with_capacity(subdirs.len());
        let mut taken: Vec<String> = Vec::new();
        for dir in subdirs {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.to_string_lossy().into_owned());
            let id = slug::generate_slug(&name, &taken);
            taken.push(id.clone());
            children.push(Collection {
                id,
                name,
                list_limit: self.list_limit,
                expand_subdirs: false,
                expand_sort: ExpandSort::Default,
                dirs: vec![dir],
            });
        }
        Ok(children)
    }

    /// Paths of every root, merged concurrently into one stream. Order
    /// across roots follows whichever producer is ready.
    pub fn get_paths(&self, catalog: &Catalog, cancel: &Cancel) -> Stream<PathBuf> {
        let streams: Vec<Stream<PathBuf>> = self
            .dirs
            .iter()
            .map(|dir| catalog.list_paths(std::slice::from_ref(dir), self.list_limit, cancel))
            .collect();
        merge_streams(&self.id, streams, cancel)
    }

    /// Ids for every path in the collection, resolved through `catalog`.
    pub fn get_ids(&self, catalog: &Catalog, cancel: &Cancel) -> Stream<ImageId> {
        let paths = self.get_paths(catalog, cancel);
        let catalog = catalog.clone();
        produce("collection-ids", cancel, move |out| {
            for path in paths {
                match catalog.get_id(&path) {
                    Ok(id) => {
                        if !out.send(id) {
                            return;
                        }
                    }
                    Err(Error::NotFound) => continue,
                    Err(e) => {
                        tracing::warn!("id lookup for {:?}: {}", path, e);
                    }
                }
            }
        })
    }
}

/// Fan N streams into one: a forwarder thread per input, one bounded
/// channel out.
fn merge_streams<T: Send + 'static>(
    name: &str,
    streams: Vec<Stream<T>>,
    cancel: &Cancel,
) -> Stream<T> {
    produce(&format!("merge-{}", name), cancel, move |out| {
        let (tx, rx) = bounded(64);
        let mut forwarders = Vec::new();
        for stream in streams {
            let tx = tx.clone();
            forwarders.push(std::thread::spawn(move || {
                for item in stream {
                    if tx.send(item).is_err() {
                        return;
                    }
                }
            }));
        }
        drop(tx);
        for item in rx {
            if !out.send(item) {
                break;
            }
        }
        for forwarder in forwarders {
            let _ = forwarder.join();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Info, WriteMode};
    use std::path::Path;

    #[test]
    fn test_expand_sorts_children_asc() {
        let tmp = tempfile::tempdir().unwrap();
        for sub in ["z", "a", "m"] {
            std::fs::create_dir(tmp.path().join(sub)).unwrap();
        }
        let mut collection = Collection::new("Roots", vec![tmp.path().to_path_buf()]);
        collection.expand_subdirs = true;
        collection.expand_sort = ExpandSort::Asc;
        collection.list_limit = 7;

        let children = collection.expand().unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
        assert!(children.iter().all(|c| c.list_limit == 7));
        assert!(children.iter().all(|c| !c.expand_subdirs));
    }

    #[test]
    fn test_expand_desc_reverses() {
        let tmp = tempfile::tempdir().unwrap();
        for sub in ["b", "c", "a"] {
            std::fs::create_dir(tmp.path().join(sub)).unwrap();
        }
        let mut collection = Collection::new("Roots", vec![tmp.path().to_path_buf()]);
        collection.expand_sort = ExpandSort::Desc;
        let children = collection.expand().unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_expand_unreadable_root_is_fatal() {
        let collection = Collection::new("Ghost", vec![PathBuf::from("/no/such/root")]);
        assert!(collection.expand().is_err());
    }

    #[test]
    fn test_expand_ignores_plain_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("album")).unwrap();
        std::fs::write(tmp.path().join("stray.jpg"), b"x").unwrap();
        let collection = Collection::new("Roots", vec![tmp.path().to_path_buf()]);
        let children = collection.expand().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "album");
    }

    #[test]
    fn test_get_paths_merges_all_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("c.cache.db"), None).unwrap();
        for path in ["/r1/a.jpg", "/r1/b.jpg", "/r2/c.jpg"] {
            catalog.write(Path::new(path), Info::default(), WriteMode::Append);
        }
        catalog.wait_for_commit();

        let collection = Collection::new(
            "Both",
            vec![PathBuf::from("/r1"), PathBuf::from("/r2")],
        );
        let cancel = Cancel::new();
        let mut paths: Vec<PathBuf> = collection.get_paths(&catalog, &cancel).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/r1/a.jpg"),
                PathBuf::from("/r1/b.jpg"),
                PathBuf::from("/r2/c.jpg")
            ]
        );
    }

    #[test]
    fn test_get_ids_maps_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("c.cache.db"), None).unwrap();
        catalog.write(Path::new("/r1/a.jpg"), Info::default(), WriteMode::Append);
        catalog.wait_for_commit();
        let collection = Collection::new("One", vec![PathBuf::from("/r1")]);
        let cancel = Cancel::new();
        let ids: Vec<ImageId> = collection.get_ids(&catalog, &cancel).collect();
        assert_eq!(ids, vec![catalog.get_id(Path::new("/r1/a.jpg")).unwrap()]);
    }

    #[test]
    fn test_collection_id_is_slug_of_name() {
        let collection = Collection::new("Summer Trip 2024", vec![]);
        assert_eq!(collection.id, "summer-trip-2024");
    }
}
