//! Thumbnail generators: tried only when every thumbnail source misses.
//! Each produces one canonical output for its declared class.

use crate::catalog::ImageId;
use crate::config::Fit;
use crate::error::{Error, Result};
use crate::sources::files::{extension_matches, ImageDecoderSource};
use crate::sources::{DecodableSource, SizeClass};
use crate::stream::Cancel;
use std::io::Cursor;
use std::path::Path;

pub trait ThumbnailGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> &SizeClass;
    fn accepts(&self, path: &Path) -> bool;
    fn generate(&self, ctx: &Cancel, id: ImageId, path: &Path) -> Result<Vec<u8>>;
}

/// Decode the original, honor its EXIF orientation, resize to the
/// declared class, and encode as JPEG.
pub struct ResizeGenerator {
    name: String,
    class: SizeClass,
    extensions: Vec<String>,
    decoder: ImageDecoderSource,
}

impl ResizeGenerator {
    pub fn new(name: String, class: SizeClass, extensions: Vec<String>) -> ResizeGenerator {
        let decoder = ImageDecoderSource::new(extensions.clone());
        ResizeGenerator {
            name,
            class,
            extensions,
            decoder,
        }
    }
}

impl ThumbnailGenerator for ResizeGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn accepts(&self, path: &Path) -> bool {
        extension_matches(path, &self.extensions)
    }

    fn generate(&self, ctx: &Cancel, id: ImageId, path: &Path) -> Result<Vec<u8>> {
        let img = self.decoder.decode(ctx, id, path)?;
        let img = apply_orientation(img, read_orientation(path));
        let resized = match self.class.fit {
            Fit::Inside => img.thumbnail(self.class.width, self.class.height),
            Fit::Outside => img.resize_to_fill(
                self.class.width,
                self.class.height,
                image::imageops::FilterType::Triangle,
            ),
            Fit::Original => img,
        };
        let mut bytes: Vec<u8> = Vec::new();
        resized
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .map_err(Error::transient)?;
        Ok(bytes)
    }
}

/// Best-effort EXIF orientation read; 0 when absent or unreadable.
fn read_orientation(path: &Path) -> u16 {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return 0,
    };
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(_) => return 0,
    };
    match exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .map(|f| &f.value)
    {
        Some(exif::Value::Short(v)) => v.first().copied().unwrap_or(0),
        _ => 0,
    }
}

fn apply_orientation(img: image::DynamicImage, orientation: u16) -> image::DynamicImage {
    match orientation {
        3 => img.rotate180(),
        6 => img.rotate90(),
        8 => img.rotate270(),
        2 | 4 | 5 | 7 => {
            tracing::debug!("mirror orientation {} not applied", orientation);
            img
        }
        _ => img,
    }
}
