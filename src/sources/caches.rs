//! Process-wide id lookup caches in front of the catalog. Readers share
//! them; the indexer invalidates on delete.

use crate::catalog::{Catalog, ImageId, Info};
use crate::error::Result;
use moka::sync::Cache;
use std::path::PathBuf;
use std::sync::Arc;

const PATH_CACHE_ENTRIES: u64 = 65_536;
const INFO_CACHE_ENTRIES: u64 = 65_536;

#[derive(Clone)]
pub struct PathCache {
    cache: Cache<u32, Arc<PathBuf>>,
}

impl PathCache {
    pub fn new() -> PathCache {
        PathCache {
            cache: Cache::new(PATH_CACHE_ENTRIES),
        }
    }

    pub fn get(&self, catalog: &Catalog, id: ImageId) -> Result<Arc<PathBuf>> {
        if let Some(path) = self.cache.get(&id.0) {
            return Ok(path);
        }
        let path = Arc::new(catalog.get_path_from_id(id)?);
        self.cache.insert(id.0, path.clone());
        Ok(path)
    }

    pub fn invalidate(&self, id: ImageId) {
        self.cache.invalidate(&id.0);
    }
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct InfoCache {
    cache: Cache<u32, Info>,
}

impl InfoCache {
    pub fn new() -> InfoCache {
        InfoCache {
            cache: Cache::new(INFO_CACHE_ENTRIES),
        }
    }

    pub fn get(&self, catalog: &Catalog, id: ImageId) -> Result<Info> {
        if let Some(info) = self.cache.get(&id.0) {
            return Ok(info);
        }
        let info = catalog.get_info(id)?;
        self.cache.insert(id.0, info.clone());
        Ok(info)
    }

    pub fn invalidate(&self, id: ImageId) {
        self.cache.invalidate(&id.0);
    }
}

impl Default for InfoCache {
    fn default() -> Self {
        Self::new()
    }
}
