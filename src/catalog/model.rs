use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dense identifier assigned by the catalog on first sighting of a path.
/// Never reused within one database; a deleted row leaves a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u32);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPath {
    pub id: ImageId,
    pub path: PathBuf,
}

/// Per-image attributes kept in the catalog. Default values double as
/// "unknown": a zero width or epoch timestamp marks metadata as missing,
/// a zero color marks the dominant color as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub width: u32,
    pub height: u32,
    /// Raw EXIF orientation value (1..=8), 0 when unknown.
    pub orientation: u16,
    pub taken_at: DateTime<Utc>,
    /// Dominant color as packed 0xRRGGBB.
    pub color: u32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub location: Option<String>,
}

impl Default for Info {
    fn default() -> Self {
        Info {
            width: 0,
            height: 0,
            orientation: 0,
            taken_at: Utc.timestamp_opt(0, 0).unwrap(),
            color: 0,
            lat: None,
            lon: None,
            location: None,
        }
    }
}

impl Info {
    pub fn needs_meta(&self) -> bool {
        self.width == 0 || self.taken_at.timestamp() == 0
    }

    pub fn needs_color(&self) -> bool {
        self.color == 0
    }

    pub fn megapixels(&self) -> f64 {
        (self.width as f64 * self.height as f64) / 1_000_000.0
    }
}

/// One listing row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedInfo {
    pub id: ImageId,
    pub info: Info,
}

/// Which indexed facets a work order asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissingFlags {
    pub metadata: bool,
    pub color: bool,
    pub embedding: bool,
}

impl MissingFlags {
    pub const ALL: MissingFlags = MissingFlags {
        metadata: true,
        color: true,
        embedding: true,
    };

    pub fn any(&self) -> bool {
        self.metadata || self.color || self.embedding
    }
}

/// Work order produced for the indexing queues: which facets of an
/// image's indexed state are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingInfo {
    pub id: ImageId,
    pub path: PathBuf,
    pub missing: MissingFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert only if the path is absent, preserving the existing id.
    Append,
    /// Overwrite only non-default fields of the supplied info.
    Merge,
    /// Replace the stored info fully.
    Update,
}

#[derive(Debug, Clone)]
pub enum ListOrder {
    DateAsc,
    DateDesc,
    Path,
    /// Cosine similarity to a reference embedding, most similar first.
    Similarity(crate::ai::Embedding),
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub order: ListOrder,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// 0 = unbounded.
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            order: ListOrder::DateAsc,
            date_range: None,
            limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirInfo {
    pub path: PathBuf,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Normalize a path to the OS-native separator for storage and prefix
/// matching. Comparisons stay case-sensitive; only separators change.
pub fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.replace('\\', "/")
    } else {
        s.replace('/', &std::path::MAIN_SEPARATOR.to_string())
    }
}

/// Directory prefix used for catalog range filters. Directories are a
/// distinct row class identified by the trailing separator.
pub fn dir_prefix(dir: &Path) -> String {
    let mut s = normalize_path(dir);
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    s
}
