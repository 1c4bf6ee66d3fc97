//! Embedded EXIF (IFD1) thumbnails. Camera JPEGs carry a small preview
//! in the APP1 block; extracting it avoids decoding the full image and
//! is the cheapest real-pixel source in the chain.

use crate::catalog::ImageId;
use crate::config::Fit;
use crate::error::{Error, Result};
use crate::sources::files::extension_matches;
use crate::sources::{ReadableSource, SizeClass, Source};
use crate::stream::Cancel;
use std::path::Path;

pub struct ExifThumbSource {
    class: SizeClass,
    extensions: Vec<String>,
}

impl ExifThumbSource {
    /// Camera previews are tiny (typically 160x120), so the declared
    /// class stays small; requests for bigger renditions skip this
    /// source.
    pub fn new(extensions: Vec<String>) -> ExifThumbSource {
        ExifThumbSource {
            class: SizeClass::new("exif-thumb", 256, 256, Fit::Inside),
            extensions,
        }
    }
}

impl Source for ExifThumbSource {
    fn name(&self) -> &str {
        "exif-thumb"
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, _id: ImageId, path: &Path) -> bool {
        path.is_file() && extension_matches(path, &self.extensions)
    }
}

impl ReadableSource for ExifThumbSource {
    fn read(&self, _ctx: &Cancel, _id: ImageId, path: &Path) -> Result<Vec<u8>> {
        // A file without an embedded preview is a per-source miss, not
        // "the image is gone": the chain must advance past it.
        extract_embedded_thumbnail(path)?
            .ok_or_else(|| Error::transient(anyhow::anyhow!("no embedded preview in {:?}", path)))
    }
}

/// Pull the IFD1 embedded JPEG out of a file's EXIF block.
/// `Ok(None)` when the file parses but carries no thumbnail.
pub fn extract_embedded_thumbnail(path: &Path) -> Result<Option<Vec<u8>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!("no EXIF in {:?}: {}", path, e);
            return Ok(None);
        }
    };

    let offset_field = exif.get_field(exif::Tag::JPEGInterchangeFormat, exif::In::THUMBNAIL);
    let length_field = exif.get_field(exif::Tag::JPEGInterchangeFormatLength, exif::In::THUMBNAIL);
    let (offset_field, length_field) = match (offset_field, length_field) {
        (Some(o), Some(l)) => (o, l),
        _ => return Ok(None),
    };

    let offset = match &offset_field.value {
        exif::Value::Long(v) => match v.first() {
            Some(offset) => *offset as usize,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    let length = match &length_field.value {
        exif::Value::Long(v) => match v.first() {
            Some(length) => *length as usize,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    if length == 0 {
        return Ok(None);
    }

    let buf = exif.buf();
    Ok(buf.get(offset..offset + length).map(|s| s.to_vec()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Cursor;
    use std::path::Path;

    /// Write a JPEG whose only usable content is an IFD1 embedded
    /// thumbnail: the envelope has no SOS marker, so full decoders fail
    /// and any pixels obtained must have come through the embedded path.
    ///
    /// TIFF layout (little-endian, offsets from the "II" header):
    ///   0-7:   TIFF header (IFD0 at offset 8)
    ///   8-25:  IFD0 - 1 entry (Orientation=1), next_ifd=26
    ///   26-55: IFD1 - 2 entries (offset=56, length), next_ifd=0
    ///   56+:   embedded JPEG bytes
    pub fn write_jpeg_with_embedded_thumb(path: &Path, width: u32, height: u32) {
        let thumb = image::DynamicImage::new_rgb8(width, height);
        let mut embedded: Vec<u8> = Vec::new();
        thumb
            .write_to(&mut Cursor::new(&mut embedded), image::ImageFormat::Jpeg)
            .unwrap();
        let thumb_len = embedded.len() as u32;

        let mut tiff: Vec<u8> = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&[0x2A, 0x00]);
        tiff.extend_from_slice(&8u32.to_le_bytes());

        // IFD0 at 8: Orientation=1, next_ifd=26
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0112u16.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&26u32.to_le_bytes());

        // IFD1 at 26: JPEGInterchangeFormat + length, next_ifd=0
        assert_eq!(tiff.len(), 26);
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&0x0201u16.to_le_bytes());
        tiff.extend_from_slice(&4u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&56u32.to_le_bytes());
        tiff.extend_from_slice(&0x0202u16.to_le_bytes());
        tiff.extend_from_slice(&4u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&thumb_len.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());

        assert_eq!(tiff.len(), 56);
        tiff.extend_from_slice(&embedded);

        let mut app1: Vec<u8> = b"Exif\x00\x00".to_vec();
        app1.extend_from_slice(&tiff);
        let app1_len = (app1.len() + 2) as u16;

        let mut jpeg: Vec<u8> = Vec::new();
        jpeg.extend_from_slice(&[0xFF, 0xD8]);
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&app1_len.to_be_bytes());
        jpeg.extend_from_slice(&app1);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        std::fs::write(path, &jpeg).unwrap();
    }
}
