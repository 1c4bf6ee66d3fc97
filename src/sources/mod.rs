//! Renditions of an image come from an ordered list of cooperating
//! providers: pre-existing thumbnails, embedded previews, the persistent
//! sink, the full decoder, video poster extraction. Each provider
//! declares what it can produce; resolution scans the list in priority
//! order and returns the first success.

pub mod cached;
pub mod caches;
pub mod exif_thumb;
pub mod files;
pub mod generator;
pub mod nas;
pub mod sink;
pub mod video;

use crate::catalog::ImageId;
use crate::config::Fit;
use crate::error::{Error, Result};
use crate::metrics::SourceMetrics;
use crate::stream::Cancel;
use cached::ByteCache;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Declared output of a source: a named bounding box plus how renditions
/// relate to it. `Original` classes have no fixed box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClass {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
}

impl SizeClass {
    pub fn original() -> SizeClass {
        SizeClass {
            name: "original".to_string(),
            width: 0,
            height: 0,
            fit: Fit::Original,
        }
    }

    pub fn new(name: &str, width: u32, height: u32, fit: Fit) -> SizeClass {
        SizeClass {
            name: name.to_string(),
            width,
            height,
            fit,
        }
    }

    /// Whether output of this class can serve a request for `want`.
    /// Originals serve anything, but a request for the original accepts
    /// nothing less; a sized class must cover the requested box so the
    /// renderer only ever downscales.
    pub fn satisfies(&self, want: &SizeClass) -> bool {
        if want.fit == Fit::Original {
            return self.fit == Fit::Original;
        }
        match self.fit {
            Fit::Original => true,
            _ => self.width >= want.width && self.height >= want.height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn megapixels(&self) -> f64 {
        self.area() as f64 / 1_000_000.0
    }
}

/// Common provider metadata and the cheap existence probe. The probe
/// must not read image data; it gates which providers the chain tries.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> &SizeClass;
    fn exists(&self, id: ImageId, path: &Path) -> bool;
}

/// A provider that yields encoded bytes.
pub trait ReadableSource: Source {
    fn read(&self, ctx: &Cancel, id: ImageId, path: &Path) -> Result<Vec<u8>>;
}

/// A provider that yields decoded pixels.
pub trait DecodableSource: Source {
    fn decode(&self, ctx: &Cancel, id: ImageId, path: &Path) -> Result<image::DynamicImage>;
}

/// A provider's capability set, fixed at construction so the chain
/// dispatches without probing.
#[derive(Clone)]
pub enum SourceKind {
    Reader(Arc<dyn ReadableSource>),
    Decoder(Arc<dyn DecodableSource>),
}

impl SourceKind {
    fn meta(&self) -> &dyn Source {
        match self {
            SourceKind::Reader(s) => s.as_ref() as &dyn Source,
            SourceKind::Decoder(s) => s.as_ref() as &dyn Source,
        }
    }
}

/// One resolved rendition.
#[derive(Debug)]
pub enum Rendition {
    Encoded(Arc<Vec<u8>>),
    Decoded(image::DynamicImage),
}

/// The priority-ordered source list with its shared byte cache and
/// latency accounting.
pub struct SourceChain {
    entries: Vec<SourceKind>,
    cache: ByteCache,
    metrics: Arc<SourceMetrics>,
}

impl SourceChain {
    pub fn new(entries: Vec<SourceKind>, cache: ByteCache, metrics: Arc<SourceMetrics>) -> Self {
        SourceChain {
            entries,
            cache,
            metrics,
        }
    }

    /// Resolve the cheapest rendition satisfying `want`. Transient
    /// per-source failures advance to the next candidate; `NotFound`
    /// and `NotAnImage` end the scan.
    pub fn resolve(
        &self,
        ctx: &Cancel,
        id: ImageId,
        path: &Path,
        want: &SizeClass,
    ) -> Result<Rendition> {
        for index in self.candidate_order(want) {
            if ctx.is_cancelled() {
                return Err(Error::transient(anyhow::anyhow!("cancelled")));
            }
            let entry = &self.entries[index];
            if !entry.meta().exists(id, path) {
                continue;
            }
            let result = match entry {
                SourceKind::Reader(source) => self.read_cached(ctx, source, id, path, want),
                SourceKind::Decoder(source) => {
                    let started = Instant::now();
                    match source.decode(ctx, id, path) {
                        Ok(img) => {
                            let decoded_mpix =
                                (img.width() as f64 * img.height() as f64) / 1_000_000.0;
                            self.metrics.observe_decode(
                                source.name(),
                                started.elapsed(),
                                decoded_mpix,
                                want.megapixels().max(decoded_mpix.min(1.0)),
                            );
                            Ok(Rendition::Decoded(img))
                        }
                        Err(e) => Err(e),
                    }
                }
            };
            match result {
                Ok(rendition) => return Ok(rendition),
                Err(err @ (Error::NotFound | Error::NotAnImage(_))) => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        "source {} failed for {} ({:?}): {}",
                        entry.meta().name(),
                        id,
                        path,
                        err
                    );
                }
            }
        }
        Err(Error::NotFound)
    }

    fn read_cached(
        &self,
        ctx: &Cancel,
        source: &Arc<dyn ReadableSource>,
        id: ImageId,
        path: &Path,
        want: &SizeClass,
    ) -> Result<Rendition> {
        let metrics = self.metrics.clone();
        let bytes = self.cache.get_or_load(source.name(), id, &want.name, || {
            let started = Instant::now();
            let bytes = source.read(ctx, id, path)?;
            metrics.observe(source.name(), started.elapsed());
            Ok(bytes)
        })?;
        Ok(Rendition::Encoded(bytes))
    }

    /// Priority order for a request: list order, refined so that within
    /// a size class the variant whose fit matches the request comes
    /// first, and fit-inside beats fit-outside otherwise. The sort is
    /// stable, so everything else keeps its configured position.
    fn candidate_order(&self, want: &SizeClass) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len())
            .filter(|i| self.entries[*i].meta().size().satisfies(want))
            .collect();
        let rank = |class: &SizeClass| -> u8 {
            if class.fit == want.fit {
                0
            } else if class.fit == Fit::Inside {
                1
            } else {
                2
            }
        };
        order.sort_by_key(|i| {
            let class = self.entries[*i].meta().size();
            (class.name.clone(), rank(class))
        });
        // Group ordering above is by name; restore configured priority
        // between distinct classes while keeping the fit refinement.
        order.sort_by_key(|i| {
            let class = self.entries[*i].meta().size();
            rank_position(&self.entries, &class.name)
        });
        order
    }
}

fn rank_position(entries: &[SourceKind], name: &str) -> usize {
    entries
        .iter()
        .position(|e| e.meta().size().name == name)
        .unwrap_or(usize::MAX)
}

/// Poster-frame resolutions offered for video files.
const VIDEO_CLASSES: &[(&str, u32)] = &[("video-sm", 240), ("video-md", 640), ("video-lg", 1280)];

/// Build the tile-serving chain from configuration: configured thumbnail
/// variants first (sink-backed or NAS-templated), then embedded EXIF
/// previews, video poster extraction, and finally the originals (raw
/// bytes, then the full decoder).
pub fn render_chain_from_config(
    config: &crate::config::Config,
    thumb_sink: Arc<crate::catalog::ThumbSink>,
    registry: &prometheus::Registry,
) -> anyhow::Result<SourceChain> {
    config.validate_thumbnails()?;
    let metrics = Arc::new(SourceMetrics::new(registry)?);
    let cache = ByteCache::new(config.image_cache_bytes()?);
    let image_extensions = config.index_extensions();
    let video_extensions = config.video_extensions();

    let mut entries: Vec<SourceKind> = Vec::new();
    for spec in &config.thumbnails {
        let class = SizeClass::new(&spec.name, spec.width, spec.height, spec.fit);
        let extensions = if spec.extensions.is_empty() {
            image_extensions.clone()
        } else {
            spec.extensions.clone()
        };
        let source: Arc<dyn ReadableSource> = match &spec.path {
            Some(template) => Arc::new(nas::NasThumbSource::new(
                spec.name.clone(),
                class,
                template.clone(),
                extensions,
            )),
            None => Arc::new(sink::SinkThumbSource::new(class, thumb_sink.clone())),
        };
        entries.push(SourceKind::Reader(source));
    }
    entries.push(SourceKind::Reader(Arc::new(
        exif_thumb::ExifThumbSource::new(image_extensions.clone()),
    )));
    for (name, edge) in VIDEO_CLASSES {
        entries.push(SourceKind::Reader(Arc::new(video::VideoThumbSource::new(
            (*name).to_string(),
            SizeClass::new(name, *edge, *edge, Fit::Inside),
            video_extensions.clone(),
        ))));
    }
    entries.push(SourceKind::Reader(Arc::new(files::FileSource::new())));
    entries.push(SourceKind::Decoder(Arc::new(
        files::ImageDecoderSource::new(image_extensions),
    )));
    Ok(SourceChain::new(entries, cache, metrics))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory reader with call accounting, for cache and chain tests.
    pub struct CountingSource {
        pub name: &'static str,
        pub class: SizeClass,
        pub bytes: Vec<u8>,
        pub present: bool,
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl CountingSource {
        pub fn new(name: &'static str, class: SizeClass, bytes: &[u8]) -> Self {
            CountingSource {
                name,
                class,
                bytes: bytes.to_vec(),
                present: true,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Source for CountingSource {
        fn name(&self) -> &str {
            self.name
        }
        fn size(&self) -> &SizeClass {
            &self.class
        }
        fn exists(&self, _id: ImageId, _path: &Path) -> bool {
            self.present
        }
    }

    impl ReadableSource for CountingSource {
        fn read(&self, _ctx: &Cancel, _id: ImageId, _path: &Path) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::transient(anyhow::anyhow!("broken source")));
            }
            Ok(self.bytes.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CountingSource;
    use super::*;
    use prometheus::Registry;

    fn chain_with(sources: Vec<Arc<CountingSource>>) -> SourceChain {
        let entries = sources
            .into_iter()
            .map(|s| SourceKind::Reader(s as Arc<dyn ReadableSource>))
            .collect();
        SourceChain::new(
            entries,
            ByteCache::new(1 << 20),
            Arc::new(SourceMetrics::new(&Registry::new()).unwrap()),
        )
    }

    fn want_small() -> SizeClass {
        SizeClass::new("S", 240, 240, Fit::Inside)
    }

    #[test]
    fn test_satisfies_requires_coverage() {
        let small = SizeClass::new("S", 240, 240, Fit::Inside);
        let large = SizeClass::new("L", 1920, 1080, Fit::Inside);
        assert!(large.satisfies(&SizeClass::new("M", 640, 480, Fit::Inside)));
        assert!(!small.satisfies(&SizeClass::new("M", 640, 480, Fit::Inside)));
        assert!(SizeClass::original().satisfies(&large));
        // Only an original can serve a request for the original.
        assert!(!large.satisfies(&SizeClass::original()));
        assert!(SizeClass::original().satisfies(&SizeClass::original()));
    }

    #[test]
    fn test_first_satisfying_source_wins() {
        let a = Arc::new(CountingSource::new(
            "a",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"from-a",
        ));
        let b = Arc::new(CountingSource::new(
            "b",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"from-b",
        ));
        let chain = chain_with(vec![a.clone(), b.clone()]);
        let cancel = Cancel::new();
        match chain
            .resolve(&cancel, ImageId(1), Path::new("/p/a.jpg"), &want_small())
            .unwrap()
        {
            Rendition::Encoded(bytes) => assert_eq!(&bytes[..], b"from-a"),
            _ => panic!("expected encoded bytes"),
        }
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[test]
    fn test_undersized_source_is_skipped() {
        let tiny = Arc::new(CountingSource::new(
            "tiny",
            SizeClass::new("XS", 100, 100, Fit::Inside),
            b"tiny",
        ));
        let big = Arc::new(CountingSource::new(
            "big",
            SizeClass::new("L", 1920, 1080, Fit::Inside),
            b"big",
        ));
        let chain = chain_with(vec![tiny.clone(), big.clone()]);
        let cancel = Cancel::new();
        let got = chain
            .resolve(&cancel, ImageId(1), Path::new("/p/a.jpg"), &want_small())
            .unwrap();
        match got {
            Rendition::Encoded(bytes) => assert_eq!(&bytes[..], b"big"),
            _ => panic!("expected encoded"),
        }
        assert_eq!(tiny.calls(), 0);
    }

    #[test]
    fn test_transient_failure_advances_to_next() {
        let mut broken = CountingSource::new(
            "broken",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"never",
        );
        broken.fail = true;
        let broken = Arc::new(broken);
        let good = Arc::new(CountingSource::new(
            "good",
            SizeClass::new("M", 640, 640, Fit::Inside),
            b"good",
        ));
        let chain = chain_with(vec![broken.clone(), good.clone()]);
        let cancel = Cancel::new();
        let got = chain
            .resolve(&cancel, ImageId(1), Path::new("/p/a.jpg"), &want_small())
            .unwrap();
        match got {
            Rendition::Encoded(bytes) => assert_eq!(&bytes[..], b"good"),
            _ => panic!("expected encoded"),
        }
        assert_eq!(broken.calls(), 1);
        assert_eq!(good.calls(), 1);
    }

    #[test]
    fn test_missing_everywhere_is_not_found() {
        let mut absent = CountingSource::new(
            "absent",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"",
        );
        absent.present = false;
        let chain = chain_with(vec![Arc::new(absent)]);
        let cancel = Cancel::new();
        let err = chain
            .resolve(&cancel, ImageId(1), Path::new("/p/a.jpg"), &want_small())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn test_cache_makes_repeat_resolution_free() {
        let a = Arc::new(CountingSource::new(
            "a",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"payload",
        ));
        let chain = chain_with(vec![a.clone()]);
        let cancel = Cancel::new();
        let first = chain
            .resolve(&cancel, ImageId(7), Path::new("/p/a.jpg"), &want_small())
            .unwrap();
        let second = chain
            .resolve(&cancel, ImageId(7), Path::new("/p/a.jpg"), &want_small())
            .unwrap();
        match (first, second) {
            (Rendition::Encoded(x), Rendition::Encoded(y)) => assert_eq!(x, y),
            _ => panic!("expected encoded"),
        }
        assert_eq!(a.calls(), 1, "second resolution must come from cache");
    }

    #[test]
    fn test_render_chain_from_config_resolves_an_original() {
        let dir = tempfile::tempdir().unwrap();
        let thumb_sink = Arc::new(
            crate::catalog::ThumbSink::open(&dir.path().join("t.thumbs.db")).unwrap(),
        );
        let config = crate::config::Config::default();
        let chain =
            render_chain_from_config(&config, thumb_sink, &Registry::new()).unwrap();

        let photo = dir.path().join("a.jpg");
        image::DynamicImage::new_rgb8(10, 10).save(&photo).unwrap();
        let cancel = Cancel::new();
        // No pre-sized variant exists, so the raw original serves it.
        match chain
            .resolve(&cancel, ImageId(1), &photo, &SizeClass::original())
            .unwrap()
        {
            Rendition::Encoded(bytes) => {
                assert_eq!(&bytes[..], &std::fs::read(&photo).unwrap()[..]);
            }
            Rendition::Decoded(_) => panic!("file reader should win over the decoder"),
        }
    }

    #[test]
    fn test_fit_match_wins_within_a_class() {
        let outside = Arc::new(CountingSource::new(
            "outside",
            SizeClass::new("S", 240, 240, Fit::Outside),
            b"outside",
        ));
        let inside = Arc::new(CountingSource::new(
            "inside",
            SizeClass::new("S", 240, 240, Fit::Inside),
            b"inside",
        ));
        // Outside is listed first, but an inside-fit request prefers the
        // matching variant within the same class.
        let chain = chain_with(vec![outside.clone(), inside.clone()]);
        let cancel = Cancel::new();
        let got = chain
            .resolve(&cancel, ImageId(1), Path::new("/p/a.jpg"), &want_small())
            .unwrap();
        match got {
            Rendition::Encoded(bytes) => assert_eq!(&bytes[..], b"inside"),
            _ => panic!("expected encoded"),
        }
    }
}
