//! End-to-end indexing flows over real temp directories: fresh index,
//! delete propagation into catalog and sink, queue quiescence, and
//! cancellation behavior.

use crate::catalog::{Catalog, MissingFlags, MissingInfo, ThumbSink};
use crate::index::indexer::Indexer;
use crate::index::meta::{ExifPool, MetaIndexer};
use crate::index::queue::Queue;
use crate::index::ContentsIndexer;
use crate::stream::Cancel;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn exts() -> Vec<String> {
    vec![".jpg".into()]
}

struct World {
    dir: tempfile::TempDir,
    catalog: Catalog,
    sink: Arc<ThumbSink>,
}

impl World {
    fn new() -> World {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("w.cache.db"), None).unwrap();
        let sink = Arc::new(ThumbSink::open(&dir.path().join("w.thumbs.db")).unwrap());
        World { dir, catalog, sink }
    }

    fn photos_dir(&self) -> PathBuf {
        let p = self.dir.path().join("p");
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn write_jpeg(&self, name: &str) -> PathBuf {
        let path = self.photos_dir().join(name);
        image::DynamicImage::new_rgb8(24, 24).save(&path).unwrap();
        path
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(self.catalog.clone(), self.sink.clone(), exts(), None, None)
    }
}

#[test]
fn test_fresh_index_yields_matching_files_in_insertion_order() {
    let world = World::new();
    let a = world.write_jpeg("a.jpg");
    let b = world.write_jpeg("b.jpg");
    std::fs::write(world.photos_dir().join("c.txt"), b"not an image").unwrap();

    let cancel = Cancel::new();
    let stats = world
        .indexer()
        .index_files(&world.photos_dir(), 0, &cancel)
        .unwrap();
    assert_eq!(stats.files_seen, 2);

    let mut listed: Vec<PathBuf> = world
        .catalog
        .list_paths(&[world.photos_dir()], 0, &cancel)
        .collect();
    listed.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(listed, expected);

    // Directory stamp lands with the index pass.
    assert!(world
        .catalog
        .get_dir(&world.photos_dir())
        .unwrap()
        .indexed_at
        .is_some());
}

#[test]
fn test_reindex_is_idempotent() {
    let world = World::new();
    world.write_jpeg("a.jpg");
    let cancel = Cancel::new();
    let indexer = world.indexer();
    indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();
    let id_before = world
        .catalog
        .get_id(&world.photos_dir().join("a.jpg"))
        .unwrap();
    indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();
    let id_after = world
        .catalog
        .get_id(&world.photos_dir().join("a.jpg"))
        .unwrap();
    assert_eq!(id_before, id_after);
    assert_eq!(
        world.catalog.get_dirs_count(&[world.photos_dir()]).unwrap(),
        1
    );
}

#[test]
fn test_delete_propagates_to_catalog_and_sink() {
    let world = World::new();
    let a = world.write_jpeg("a.jpg");
    world.write_jpeg("b.jpg");
    let cancel = Cancel::new();
    let indexer = world.indexer();
    indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();

    let id_a = world.catalog.get_id(&a).unwrap();
    world.sink.write(id_a, "S", b"thumb-bytes").unwrap();
    assert!(world.sink.contains_any(id_a));

    std::fs::remove_file(&a).unwrap();
    let stats = indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();
    assert_eq!(stats.deleted, 1);

    let listed: Vec<PathBuf> = world
        .catalog
        .list_paths(&[world.photos_dir()], 0, &cancel)
        .collect();
    assert_eq!(listed, vec![world.photos_dir().join("b.jpg")]);
    assert!(
        !world.sink.contains_any(id_a),
        "sink must drop thumbnails of deleted images"
    );
}

#[test]
fn test_queues_reach_quiescence_and_nothing_stays_missing() {
    let world = World::new();
    world.write_jpeg("a.jpg");
    world.write_jpeg("b.jpg");

    let meta = Arc::new(MetaIndexer::new(
        world.catalog.clone(),
        Arc::new(ExifPool::new(2)),
        vec!["%Y:%m:%d %H:%M:%S".to_string()],
        None,
    ));
    let contents = Arc::new(ContentsIndexer::new(world.catalog.clone(), None));
    let metadata_queue = Queue::start(
        "metadata",
        64,
        2,
        Arc::new(move |item: MissingInfo| meta.index(&item)),
    );
    let contents_queue = Queue::start(
        "contents",
        64,
        2,
        Arc::new(move |item: MissingInfo| contents.index(&item)),
    );

    let indexer = Indexer::new(
        world.catalog.clone(),
        world.sink.clone(),
        exts(),
        Some(metadata_queue.clone()),
        Some(contents_queue.clone()),
    );
    let cancel = Cancel::new();
    let stats = indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();
    assert_eq!(stats.queued_metadata, 2);
    assert_eq!(stats.queued_contents, 2);

    metadata_queue.wait_until_done();
    contents_queue.wait_until_done();
    world.catalog.wait_for_commit();
    assert_eq!(metadata_queue.progress(), (2, 0));
    assert_eq!(contents_queue.progress(), (2, 0));

    // Synthetic JPEGs carry no EXIF date, so the timestamp legitimately
    // stays at epoch; width/height and color must be satisfied.
    let missing: Vec<MissingInfo> = world
        .catalog
        .list_missing(
            &[world.photos_dir()],
            0,
            MissingFlags {
                color: true,
                embedding: true,
                ..MissingFlags::default()
            },
            &cancel,
        )
        .collect();
    assert!(missing.is_empty(), "still missing: {:?}", missing);
    for item in world
        .catalog
        .list_missing(&[world.photos_dir()], 0, MissingFlags::ALL, &cancel)
    {
        let info = world.catalog.get_info(item.id).unwrap();
        assert_ne!(info.width, 0, "dimensions must be indexed for {:?}", item.path);
    }

    metadata_queue.shutdown();
    contents_queue.shutdown();
}

#[test]
fn test_cancelled_walk_does_not_delete_survivors() {
    let world = World::new();
    for i in 0..20 {
        world.write_jpeg(&format!("img{:02}.jpg", i));
    }
    let cancel = Cancel::new();
    let indexer = world.indexer();
    indexer.index_files(&world.photos_dir(), 0, &cancel).unwrap();
    assert_eq!(
        world.catalog.get_dirs_count(&[world.photos_dir()]).unwrap(),
        20
    );

    // Cancelled mid-pass: the partial observation set must not be
    // treated as the truth about the directory.
    let cancelled = Cancel::new();
    cancelled.cancel();
    let stats = indexer
        .index_files(&world.photos_dir(), 0, &cancelled)
        .unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(
        world.catalog.get_dirs_count(&[world.photos_dir()]).unwrap(),
        20,
        "cancellation must not drop catalog rows"
    );
}

#[test]
fn test_walk_producer_terminates_after_cancel() {
    let world = World::new();
    for i in 0..300 {
        world.write_jpeg(&format!("img{:03}.jpg", i));
    }
    let cancel = Cancel::new();
    let stream = crate::index::walk::walk(&world.photos_dir(), &exts(), 0, &cancel).unwrap();
    assert!(stream.recv().is_some());
    cancel.cancel();
    let start = std::time::Instant::now();
    let _rest: Vec<PathBuf> = stream.collect();
    assert!(
        start.elapsed() < std::time::Duration::from_millis(100),
        "producer must close its stream promptly after cancellation"
    );
}

#[test]
fn test_round_trip_id_and_path() {
    let world = World::new();
    let a = world.write_jpeg("a.jpg");
    let cancel = Cancel::new();
    world.indexer().index_files(&world.photos_dir(), 0, &cancel).unwrap();
    let id = world.catalog.get_id(&a).unwrap();
    assert_eq!(world.catalog.get_path_from_id(id).unwrap(), a);
}

#[test]
fn test_nested_dirs_are_indexed_under_one_root() {
    let world = World::new();
    let nested = world.photos_dir().join("2024").join("03");
    std::fs::create_dir_all(&nested).unwrap();
    image::DynamicImage::new_rgb8(8, 8)
        .save(nested.join("deep.jpg"))
        .unwrap();
    world.write_jpeg("top.jpg");
    let cancel = Cancel::new();
    let stats = world
        .indexer()
        .index_files(&world.photos_dir(), 0, &cancel)
        .unwrap();
    assert_eq!(stats.files_seen, 2);
    assert!(world
        .catalog
        .get_id(Path::new(&nested.join("deep.jpg")))
        .is_ok());
}
