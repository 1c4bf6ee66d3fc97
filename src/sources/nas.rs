//! Thumbnails that NAS appliances have already generated next to the
//! originals, located through a path template with `{{.Dir}}` and
//! `{{.Filename}}` placeholders, e.g.
//! `{{.Dir}}@eaDir/{{.Filename}}/SYNOPHOTO_THUMB_SM.jpg`.

use crate::catalog::ImageId;
use crate::error::Result;
use crate::sources::files::extension_matches;
use crate::sources::{ReadableSource, SizeClass, Source};
use crate::stream::Cancel;
use std::path::{Path, PathBuf};

pub struct NasThumbSource {
    name: String,
    class: SizeClass,
    template: String,
    extensions: Vec<String>,
}

impl NasThumbSource {
    pub fn new(
        name: String,
        class: SizeClass,
        template: String,
        extensions: Vec<String>,
    ) -> NasThumbSource {
        NasThumbSource {
            name,
            class,
            template,
            extensions,
        }
    }

    fn render(&self, path: &Path) -> Option<PathBuf> {
        let dir = path.parent()?;
        let filename = path.file_stem()?.to_str()?;
        let mut dir_str = dir.to_string_lossy().into_owned();
        if !dir_str.ends_with(std::path::MAIN_SEPARATOR) {
            dir_str.push(std::path::MAIN_SEPARATOR);
        }
        let rendered = self
            .template
            .replace("{{.Dir}}", &dir_str)
            .replace("{{.Filename}}", filename);
        Some(PathBuf::from(rendered))
    }
}

impl Source for NasThumbSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, _id: ImageId, path: &Path) -> bool {
        if !extension_matches(path, &self.extensions) {
            return false;
        }
        self.render(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

impl ReadableSource for NasThumbSource {
    fn read(&self, _ctx: &Cancel, _id: ImageId, path: &Path) -> Result<Vec<u8>> {
        let rendered = self
            .render(path)
            .ok_or(crate::error::Error::NotFound)?;
        Ok(std::fs::read(rendered)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Fit;

    fn source(template: &str) -> NasThumbSource {
        NasThumbSource::new(
            "nas-sm".to_string(),
            SizeClass::new("SM", 240, 240, Fit::Inside),
            template.to_string(),
            vec![".jpg".into()],
        )
    }

    #[test]
    fn test_template_renders_dir_and_filename() {
        let s = source("{{.Dir}}@eaDir/{{.Filename}}/SYNOPHOTO_THUMB_SM.jpg");
        let sep = std::path::MAIN_SEPARATOR;
        let rendered = s.render(Path::new("/photos/trip/IMG_0042.jpg")).unwrap();
        assert_eq!(
            rendered,
            PathBuf::from(format!(
                "/photos{sep}trip{sep}@eaDir/IMG_0042/SYNOPHOTO_THUMB_SM.jpg"
            ))
        );
    }

    #[test]
    fn test_reads_pre_existing_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("IMG_1.jpg");
        std::fs::write(&original, b"original").unwrap();
        let thumb_dir = dir.path().join("@eaDir").join("IMG_1");
        std::fs::create_dir_all(&thumb_dir).unwrap();
        std::fs::write(thumb_dir.join("SYNOPHOTO_THUMB_SM.jpg"), b"small").unwrap();

        let s = source("{{.Dir}}@eaDir/{{.Filename}}/SYNOPHOTO_THUMB_SM.jpg");
        assert!(s.exists(ImageId(1), &original));
        let bytes = s.read(&Cancel::new(), ImageId(1), &original).unwrap();
        assert_eq!(bytes, b"small");
    }

    #[test]
    fn test_absent_thumbnail_fails_exists() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("IMG_2.jpg");
        std::fs::write(&original, b"original").unwrap();
        let s = source("{{.Dir}}@eaDir/{{.Filename}}/SYNOPHOTO_THUMB_SM.jpg");
        assert!(!s.exists(ImageId(2), &original));
    }

    #[test]
    fn test_extension_filter_applies_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("clip.mp4");
        std::fs::write(&original, b"video").unwrap();
        let s = source("{{.Dir}}@eaDir/{{.Filename}}/SYNOPHOTO_THUMB_SM.jpg");
        assert!(!s.exists(ImageId(3), &original));
    }
}
