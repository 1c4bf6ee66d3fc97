//! The persistent thumbnail sink exposed as a read source, one instance
//! per stored size class. The write side belongs to the thumbnail
//! pipeline; here the sink is just the fastest pre-sized provider.

use crate::catalog::{ImageId, ThumbSink};
use crate::error::Result;
use crate::sources::{ReadableSource, SizeClass, Source};
use crate::stream::Cancel;
use std::path::Path;
use std::sync::Arc;

pub struct SinkThumbSource {
    class: SizeClass,
    sink: Arc<ThumbSink>,
}

impl SinkThumbSource {
    pub fn new(class: SizeClass, sink: Arc<ThumbSink>) -> SinkThumbSource {
        SinkThumbSource { class, sink }
    }
}

impl Source for SinkThumbSource {
    fn name(&self) -> &str {
        "thumb-sink"
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, id: ImageId, _path: &Path) -> bool {
        self.sink.contains(id, &self.class.name)
    }
}

impl ReadableSource for SinkThumbSource {
    fn read(&self, _ctx: &Cancel, id: ImageId, _path: &Path) -> Result<Vec<u8>> {
        self.sink.read(id, &self.class.name)
    }
}
