//! Contents worker: dominant color from decoded pixels, embeddings from
//! the AI collaborator when one is wired. Both facets persist through
//! the catalog writer; a disabled collaborator is not an error.

use crate::ai::Clip;
use crate::catalog::{Catalog, Info, MissingInfo, WriteMode};
use crate::error::Error;
use crate::index::color::dominant_color;
use std::sync::Arc;

pub struct ContentsIndexer {
    catalog: Catalog,
    clip: Option<Arc<dyn Clip>>,
}

impl ContentsIndexer {
    pub fn new(catalog: Catalog, clip: Option<Arc<dyn Clip>>) -> ContentsIndexer {
        ContentsIndexer { catalog, clip }
    }

    /// Queue worker entry point: failures log and continue.
    pub fn index(&self, item: &MissingInfo) {
        if item.missing.color {
            self.index_color(item);
        }
        if item.missing.embedding {
            self.index_embedding(item);
        }
    }

    fn index_color(&self, item: &MissingInfo) {
        let img = match image::open(&item.path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("color decode {:?}: {}", item.path, e);
                return;
            }
        };
        let mut info = Info::default();
        info.color = dominant_color(&img);
        self.catalog.write(&item.path, info, WriteMode::Merge);
    }

    fn index_embedding(&self, item: &MissingInfo) {
        let clip = match &self.clip {
            Some(clip) => clip,
            // AI disabled: embeddings simply stay missing.
            None => return,
        };
        let encoded = match std::fs::read(&item.path) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("embedding read {:?}: {}", item.path, e);
                return;
            }
        };
        match clip.embed_image(&encoded) {
            Ok(embedding) => {
                if let Err(e) = self.catalog.write_embedding(item.id, embedding) {
                    tracing::warn!("embedding persist {}: {}", item.id, e);
                }
            }
            Err(Error::Unavailable(what)) => {
                tracing::debug!("{} unavailable for {:?}", what, item.path);
            }
            Err(e) => {
                tracing::warn!("embedding {:?}: {}", item.path, e);
            }
        }
    }
}
