//! Read-through thumbnail pipeline: thumbnail sources in priority order,
//! generators on a total miss, generated bytes persisted into the sink
//! on the way out. Concurrent generation for the same (image, size) is
//! coalesced so the expensive decode happens once.

use crate::catalog::{Catalog, ImageId, ThumbSink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sources::caches::PathCache;
use crate::sources::exif_thumb::ExifThumbSource;
use crate::sources::generator::{ResizeGenerator, ThumbnailGenerator};
use crate::sources::nas::NasThumbSource;
use crate::sources::sink::SinkThumbSource;
use crate::sources::{ReadableSource, SizeClass};
use crate::stream::Cancel;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

pub struct ThumbnailPipeline {
    catalog: Catalog,
    paths: PathCache,
    sources: Vec<Arc<dyn ReadableSource>>,
    generators: Vec<Arc<dyn ThumbnailGenerator>>,
    sink: Arc<ThumbSink>,
    // Coalesces concurrent generation and absorbs request bursts; the
    // sink is the durable store.
    inflight: Cache<(u32, String), Arc<Vec<u8>>>,
}

impl ThumbnailPipeline {
    pub fn new(
        catalog: Catalog,
        sink: Arc<ThumbSink>,
        sources: Vec<Arc<dyn ReadableSource>>,
        generators: Vec<Arc<dyn ThumbnailGenerator>>,
    ) -> ThumbnailPipeline {
        ThumbnailPipeline {
            catalog,
            paths: PathCache::new(),
            sources,
            generators,
            sink,
            inflight: Cache::builder()
                .max_capacity(256)
                .time_to_idle(Duration::from_secs(60))
                .support_invalidation_closures()
                .build(),
        }
    }

    /// Wire the pipeline from the configured thumbnail variants: the
    /// sink plus NAS-templated locations as sources, a resize generator
    /// per generated variant, and embedded EXIF previews as the last
    /// pre-sized source.
    pub fn from_config(
        config: &Config,
        catalog: Catalog,
        sink: Arc<ThumbSink>,
    ) -> anyhow::Result<ThumbnailPipeline> {
        config.validate_thumbnails()?;
        let image_extensions = config.index_extensions();
        let mut sources: Vec<Arc<dyn ReadableSource>> = Vec::new();
        let mut generators: Vec<Arc<dyn ThumbnailGenerator>> = Vec::new();
        for spec in &config.thumbnails {
            let class = SizeClass::new(&spec.name, spec.width, spec.height, spec.fit);
            let extensions = if spec.extensions.is_empty() {
                image_extensions.clone()
            } else {
                spec.extensions.clone()
            };
            match &spec.path {
                Some(template) => {
                    sources.push(Arc::new(NasThumbSource::new(
                        spec.name.clone(),
                        class,
                        template.clone(),
                        extensions,
                    )));
                }
                None => {
                    sources.push(Arc::new(SinkThumbSource::new(class.clone(), sink.clone())));
                    generators.push(Arc::new(ResizeGenerator::new(
                        spec.name.clone(),
                        class,
                        extensions,
                    )));
                }
            }
        }
        sources.push(Arc::new(ExifThumbSource::new(image_extensions)));
        Ok(ThumbnailPipeline::new(catalog, sink, sources, generators))
    }

    /// Resolve a thumbnail of class `want` for `id`.
    pub fn get(&self, ctx: &Cancel, id: ImageId, want: &SizeClass) -> Result<Arc<Vec<u8>>> {
        let path = self.paths.get(&self.catalog, id)?;

        for source in &self.sources {
            if !source.size().satisfies(want) || !source.exists(id, &path) {
                continue;
            }
            match source.read(ctx, id, &path) {
                Ok(bytes) => return Ok(Arc::new(bytes)),
                Err(Error::NotAnImage(p)) => return Err(Error::NotAnImage(p)),
                Err(e) => {
                    tracing::debug!("thumb source {} missed for {}: {}", source.name(), id, e);
                }
            }
        }

        self.generate(ctx, id, &path, want)
    }

    /// Invalidate per-image state after a catalog delete.
    pub fn forget(&self, id: ImageId) {
        self.paths.invalidate(id);
        let victim = id.0;
        let _ = self.inflight.invalidate_entries_if(move |key, _| key.0 == victim);
    }

    fn generate(
        &self,
        ctx: &Cancel,
        id: ImageId,
        path: &std::path::Path,
        want: &SizeClass,
    ) -> Result<Arc<Vec<u8>>> {
        let key = (id.0, want.name.clone());
        self.inflight
            .try_get_with(key, || -> Result<Arc<Vec<u8>>> {
                for generator in &self.generators {
                    if !generator.size().satisfies(want) || !generator.accepts(path) {
                        continue;
                    }
                    match generator.generate(ctx, id, path) {
                        Ok(bytes) => {
                            let size_name = &generator.size().name;
                            if let Err(e) = self.sink.write(id, size_name, &bytes) {
                                tracing::warn!(
                                    "cannot persist {}/{} to sink: {}",
                                    id,
                                    size_name,
                                    e
                                );
                            }
                            return Ok(Arc::new(bytes));
                        }
                        Err(err @ Error::NotAnImage(_)) => return Err(err),
                        Err(e) => {
                            tracing::warn!(
                                "generator {} failed for {} ({:?}): {}",
                                generator.name(),
                                id,
                                path,
                                e
                            );
                        }
                    }
                }
                Err(Error::NotFound)
            })
            .map_err(Error::from_shared)
    }
}
