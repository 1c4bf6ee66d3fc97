use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_video_extensions() -> Vec<String> {
    [".mp4", ".mov", ".avi", ".mkv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_date_formats() -> Vec<String> {
    vec![
        "%Y:%m:%d %H:%M:%S".to_string(),
        "%Y-%m-%d %H:%M:%S".to_string(),
        "%Y:%m:%d %H:%M:%S%.f".to_string(),
    ]
}

fn default_exif_tool_count() -> usize {
    4
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2).max(1))
        .unwrap_or(1)
}

fn default_cache_size() -> String {
    "256MB".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// How a rendition relates to the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Scaled to fit entirely inside the box.
    #[default]
    Inside,
    /// Scaled to cover the box, cropping overflow.
    Outside,
    /// The untouched original.
    Original,
}

/// One pre-sized rendition variant. Entries with a `path` template locate
/// thumbnails that already exist on disk (NAS appliances); entries
/// without one declare a generated variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailSpec {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub fit: Fit,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaConfig {
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheConfig {
    #[serde(default = "default_cache_size")]
    pub max_size: String,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CachesConfig {
    #[serde(default)]
    pub image: ImageCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoConfig {
    #[serde(default)]
    pub reverse_geocode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpandSort {
    #[default]
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    #[serde(default)]
    pub list_limit: usize,
    #[serde(default)]
    pub expand_subdirs: bool,
    #[serde(default)]
    pub expand_sort: ExpandSort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub images: MediaConfig,
    #[serde(default)]
    pub videos: MediaConfig,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default = "default_exif_tool_count")]
    pub exif_tool_count: usize,
    #[serde(default = "default_worker_count")]
    pub concurrent_meta_loads: usize,
    #[serde(default = "default_worker_count")]
    pub concurrent_color_loads: usize,
    #[serde(default = "default_worker_count")]
    pub concurrent_ai_loads: usize,
    #[serde(default)]
    pub caches: CachesConfig,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailSpec>,
    #[serde(default)]
    pub skip_load_info: bool,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize from defaults")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {:?}", path))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("cannot parse config {:?}", path))?;
        Ok(config)
    }

    /// Extensions used for catalog indexing. `images.extensions` and
    /// `videos.extensions` split the same set for serving; indexing sees
    /// their union plus the top-level list.
    pub fn index_extensions(&self) -> Vec<String> {
        let mut all = self.extensions.clone();
        for ext in self.images.extensions.iter().chain(&self.videos.extensions) {
            if !all.contains(ext) {
                all.push(ext.clone());
            }
        }
        if all.is_empty() {
            all = default_extensions();
        }
        all
    }

    pub fn video_extensions(&self) -> Vec<String> {
        if self.videos.extensions.is_empty() {
            default_video_extensions()
        } else {
            self.videos.extensions.clone()
        }
    }

    pub fn image_cache_bytes(&self) -> Result<u64> {
        parse_size(&self.caches.image.max_size)
    }

    /// Reject thumbnail lists the source chain cannot be built from.
    pub fn validate_thumbnails(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.thumbnails {
            if spec.name.is_empty() {
                bail!("thumbnail variant with empty name");
            }
            if !seen.insert(spec.name.as_str()) {
                bail!("duplicate thumbnail variant {:?}", spec.name);
            }
            if spec.fit != Fit::Original && (spec.width == 0 || spec.height == 0) {
                bail!(
                    "thumbnail variant {:?} has zero dimensions ({}x{})",
                    spec.name,
                    spec.width,
                    spec.height
                );
            }
        }
        Ok(())
    }
}

/// Parse a human-readable size like `256MB` or `1.5GiB` into bytes.
/// Decimal and binary unit suffixes are accepted; a bare number is bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .with_context(|| format!("invalid size {:?}", s))?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "KIB" => 1 << 10,
        "MIB" => 1 << 20,
        "GIB" => 1 << 30,
        other => bail!("unknown size unit {:?} in {:?}", other, s),
    };
    Ok((value * multiplier as f64) as u64)
}
