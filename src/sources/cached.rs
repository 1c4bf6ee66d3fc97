//! Shared byte cache over all sources, keyed by (source, image, size).
//! Bounded by total bytes; admission and eviction follow moka's TinyLFU
//! policy, so one scan of a huge collection cannot flush the hot set.
//! Loads for the same key are coalesced: one caller computes, the rest
//! wait for the same value.

use crate::catalog::ImageId;
use crate::error::{Error, Result};
use moka::sync::Cache;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: String,
    id: u32,
    size: String,
}

#[derive(Clone)]
pub struct ByteCache {
    cache: Cache<CacheKey, Arc<Vec<u8>>>,
}

impl ByteCache {
    pub fn new(max_bytes: u64) -> ByteCache {
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &CacheKey, value: &Arc<Vec<u8>>| {
                value.len().min(u32::MAX as usize) as u32
            })
            .support_invalidation_closures()
            .build();
        ByteCache { cache }
    }

    /// Return the cached value or compute it exactly once, even under
    /// concurrent callers for the same key.
    pub fn get_or_load(
        &self,
        source: &str,
        id: ImageId,
        size: &str,
        load: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Arc<Vec<u8>>> {
        let key = CacheKey {
            source: source.to_string(),
            id: id.0,
            size: size.to_string(),
        };
        self.cache
            .try_get_with(key, || load().map(Arc::new))
            .map_err(Error::from_shared)
    }

    pub fn invalidate_image(&self, id: ImageId) {
        // Keys are composite; moka has no prefix invalidation, so walk
        // the (bounded) entry set.
        let victim = id.0;
        let _ = self
            .cache
            .invalidate_entries_if(move |key, _| key.id == victim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_second_load_is_cached() {
        let cache = ByteCache::new(1 << 20);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let bytes = cache
                .get_or_load("files", ImageId(1), "S", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"payload".to_vec())
                })
                .unwrap();
            assert_eq!(&bytes[..], b"payload");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keys_distinguish_source_and_size() {
        let cache = ByteCache::new(1 << 20);
        let calls = AtomicUsize::new(0);
        let load = |source, size| {
            cache
                .get_or_load(source, ImageId(1), size, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![0u8])
                })
                .unwrap()
        };
        load("a", "S");
        load("a", "M");
        load("b", "S");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_loads_coalesce_to_one_call() {
        let cache = Arc::new(ByteCache::new(1 << 20));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(std::thread::spawn(move || {
                cache
                    .get_or_load("slow", ImageId(9), "S", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok(b"shared".to_vec())
                    })
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(&handle.join().unwrap()[..], b"shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "loads must coalesce");
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ByteCache::new(1 << 20);
        let calls = AtomicUsize::new(0);
        let err = cache.get_or_load("files", ImageId(2), "S", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::transient(anyhow::anyhow!("flaky disk")))
        });
        assert!(err.is_err());
        let ok = cache.get_or_load("files", ImageId(2), "S", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1])
        });
        assert!(ok.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_image_drops_all_sizes() {
        let cache = ByteCache::new(1 << 20);
        let calls = AtomicUsize::new(0);
        let load = |id: u32, size| {
            cache
                .get_or_load("files", ImageId(id), size, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![0u8])
                })
                .unwrap()
        };
        load(1, "S");
        load(1, "M");
        load(2, "S");
        cache.invalidate_image(ImageId(1));
        load(1, "S");
        load(2, "S");
        assert_eq!(calls.load(Ordering::SeqCst), 4, "only image 1 reloads");
    }
}
