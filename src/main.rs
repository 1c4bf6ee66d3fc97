use photowall::catalog::{MissingInfo, ThumbSink};
use photowall::collections::Collection;
use photowall::config::Config;
use photowall::index::{ContentsIndexer, ExifPool, Indexer, MetaIndexer, Queue};
use photowall::sources::render_chain_from_config;
use photowall::stream::Cancel;
use photowall::thumbs::ThumbnailPipeline;
use photowall::Catalog;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const EXIT_INIT: i32 = 1;
const EXIT_THUMBS: i32 = 2;

enum Fatal {
    Init(anyhow::Error),
    Thumbnails(anyhow::Error),
}

fn main() {
    tracing_subscriber::fmt::init();
    match run() {
        Ok(()) => {}
        Err(Fatal::Init(e)) => {
            tracing::error!("initialization failed: {:#}", e);
            std::process::exit(EXIT_INIT);
        }
        Err(Fatal::Thumbnails(e)) => {
            tracing::error!("thumbnail pipeline misconfigured: {:#}", e);
            std::process::exit(EXIT_THUMBS);
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path)),
        None => {
            let default = PathBuf::from("photowall.toml");
            if default.exists() {
                Config::load(&default)
            } else {
                tracing::info!("no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

fn run() -> Result<(), Fatal> {
    let config = load_config().map_err(Fatal::Init)?;
    config.validate_thumbnails().map_err(Fatal::Thumbnails)?;

    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| Fatal::Init(anyhow::anyhow!("cannot create {:?}: {}", config.data_dir, e)))?;
    // The embedding model mounts from the serving layer; until it does,
    // an enabled flag resolves to the placeholder so its model version
    // still scopes the missing-embedding queries.
    let clip: Option<Arc<dyn photowall::ai::Clip>> = if config.ai.enabled {
        Some(Arc::new(photowall::ai::DisabledClip))
    } else {
        None
    };
    let catalog = Catalog::open(
        &config.data_dir.join("photowall.cache.db"),
        clip.as_ref().map(|c| c.model().to_string()),
    )
    .map_err(Fatal::Init)?;
    let sink = Arc::new(
        ThumbSink::open(&config.data_dir.join("photowall.thumbs.db")).map_err(Fatal::Init)?,
    );
    // Built here so a broken thumbnail setup fails startup; the serving
    // layer takes ownership of both once it mounts.
    let registry = prometheus::Registry::new();
    let _chain =
        render_chain_from_config(&config, sink.clone(), &registry).map_err(Fatal::Thumbnails)?;
    let _thumbnails = ThumbnailPipeline::from_config(&config, catalog.clone(), sink.clone())
        .map_err(Fatal::Thumbnails)?;

    let (metadata_queue, contents_queue) = if config.skip_load_info {
        (None, None)
    } else {
        // The geocoding backend mounts from the serving layer; until it
        // does, an enabled flag resolves to the placeholder.
        let geocoder: Option<Arc<dyn photowall::geo::ReverseGeocoder>> =
            if config.geo.reverse_geocode {
                Some(Arc::new(photowall::geo::DisabledGeocoder))
            } else {
                None
            };
        let meta = Arc::new(MetaIndexer::new(
            catalog.clone(),
            Arc::new(ExifPool::new(config.exif_tool_count)),
            config.date_formats.clone(),
            geocoder,
        ));
        let contents = Arc::new(ContentsIndexer::new(catalog.clone(), clip.clone()));
        let metadata_queue = Queue::start(
            "metadata",
            1024,
            config.concurrent_meta_loads,
            Arc::new(move |item: MissingInfo| meta.index(&item)),
        );
        let contents_queue = Queue::start(
            "contents",
            1024,
            config.concurrent_color_loads.max(config.concurrent_ai_loads),
            Arc::new(move |item: MissingInfo| contents.index(&item)),
        );
        (Some(metadata_queue), Some(contents_queue))
    };

    let indexer = Indexer::new(
        catalog.clone(),
        sink.clone(),
        config.index_extensions(),
        metadata_queue.clone(),
        contents_queue.clone(),
    );

    let cancel = Cancel::new();
    for collection_config in &config.collections {
        let collection = Collection::from_config(collection_config);
        let units = if collection.expand_subdirs {
            collection.expand().map_err(|e| {
                Fatal::Init(anyhow::anyhow!("expanding {:?}: {}", collection.name, e))
            })?
        } else {
            vec![collection]
        };
        for unit in units {
            for dir in &unit.dirs {
                match indexer.index_files(dir, unit.list_limit, &cancel) {
                    Ok(stats) => tracing::info!(
                        "collection {:?}: {:?} -> {} file(s)",
                        unit.id,
                        dir,
                        stats.files_seen
                    ),
                    Err(e) => tracing::warn!("indexing {:?}: {}", dir, e),
                }
            }
        }
    }

    if let Some(queue) = &metadata_queue {
        queue.wait_until_done();
        queue.shutdown();
    }
    if let Some(queue) = &contents_queue {
        queue.wait_until_done();
        queue.shutdown();
    }
    catalog.wait_for_commit();
    Ok(())
}
