//! Originals straight from disk: a byte reader for serving untouched
//! files and a full decoder for everything that needs pixels.

use crate::catalog::ImageId;
use crate::error::{Error, Result};
use crate::sources::{DecodableSource, ReadableSource, SizeClass, Source};
use crate::stream::Cancel;
use std::path::Path;

/// Case-insensitive match of a path's extension against a lowercased
/// `.ext` list. An empty list accepts everything.
pub(crate) fn extension_matches(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext.to_lowercase()),
        None => return false,
    };
    extensions.iter().any(|e| e == &ext)
}

/// Raw file bytes at original size.
pub struct FileSource {
    class: SizeClass,
}

impl FileSource {
    pub fn new() -> FileSource {
        FileSource {
            class: SizeClass::original(),
        }
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for FileSource {
    fn name(&self) -> &str {
        "files"
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, _id: ImageId, path: &Path) -> bool {
        path.is_file()
    }
}

impl ReadableSource for FileSource {
    fn read(&self, _ctx: &Cancel, _id: ImageId, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }
}

/// Full decode of the original image. The most expensive source in any
/// chain; it sits last and only accepts configured image extensions.
pub struct ImageDecoderSource {
    class: SizeClass,
    extensions: Vec<String>,
}

impl ImageDecoderSource {
    pub fn new(extensions: Vec<String>) -> ImageDecoderSource {
        ImageDecoderSource {
            class: SizeClass::original(),
            extensions,
        }
    }
}

impl Source for ImageDecoderSource {
    fn name(&self) -> &str {
        "image-decoder"
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, _id: ImageId, path: &Path) -> bool {
        path.is_file() && extension_matches(path, &self.extensions)
    }
}

impl DecodableSource for ImageDecoderSource {
    fn decode(&self, _ctx: &Cancel, _id: ImageId, path: &Path) -> Result<image::DynamicImage> {
        if !extension_matches(path, &self.extensions) {
            return Err(Error::NotAnImage(path.to_string_lossy().into_owned()));
        }
        // Decoders can panic on malformed input; contain it.
        match std::panic::catch_unwind(|| image::open(path)) {
            Ok(Ok(img)) => Ok(img),
            Ok(Err(image::ImageError::IoError(e))) => Err(Error::from(e)),
            Ok(Err(e)) => Err(Error::transient(e)),
            Err(_) => {
                tracing::warn!("panic while decoding {:?}", path);
                Err(Error::transient(anyhow::anyhow!("decoder panic")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpg_exts() -> Vec<String> {
        vec![".jpg".into(), ".jpeg".into()]
    }

    #[test]
    fn test_extension_matches_is_case_insensitive() {
        assert!(extension_matches(Path::new("/a/b.JPG"), &jpg_exts()));
        assert!(extension_matches(Path::new("/a/b.jpeg"), &jpg_exts()));
        assert!(!extension_matches(Path::new("/a/b.txt"), &jpg_exts()));
        assert!(!extension_matches(Path::new("/a/noext"), &jpg_exts()));
        assert!(extension_matches(Path::new("/a/b.txt"), &[]));
    }

    #[test]
    fn test_file_source_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jpg");
        std::fs::write(&path, b"raw-bytes").unwrap();
        let source = FileSource::new();
        assert!(source.exists(ImageId(1), &path));
        let bytes = source.read(&Cancel::new(), ImageId(1), &path).unwrap();
        assert_eq!(bytes, b"raw-bytes");
    }

    #[test]
    fn test_file_source_missing_is_not_found() {
        let source = FileSource::new();
        let missing = Path::new("/definitely/not/here.jpg");
        assert!(!source.exists(ImageId(1), missing));
        assert!(matches!(
            source.read(&Cancel::new(), ImageId(1), missing),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_decoder_rejects_non_image_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, b"text").unwrap();
        let source = ImageDecoderSource::new(jpg_exts());
        assert!(!source.exists(ImageId(1), &path));
        assert!(matches!(
            source.decode(&Cancel::new(), ImageId(1), &path),
            Err(Error::NotAnImage(_))
        ));
    }

    #[test]
    fn test_decoder_decodes_real_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.jpg");
        image::DynamicImage::new_rgb8(32, 16).save(&path).unwrap();
        let source = ImageDecoderSource::new(jpg_exts());
        let img = source.decode(&Cancel::new(), ImageId(1), &path).unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }

    #[test]
    fn test_decoder_corrupt_file_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let source = ImageDecoderSource::new(jpg_exts());
        let err = source.decode(&Cancel::new(), ImageId(1), &path).unwrap_err();
        assert!(err.is_transient(), "corrupt data must not end the chain");
    }
}
