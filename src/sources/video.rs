//! Poster frames for video files, extracted by shelling out to ffmpeg.
//! One instance per configured resolution; the chain picks the smallest
//! class that still covers the request.

use crate::catalog::ImageId;
use crate::error::{Error, Result};
use crate::sources::files::extension_matches;
use crate::sources::{ReadableSource, SizeClass, Source};
use crate::stream::Cancel;
use std::path::Path;
use std::process::Command;

pub struct VideoThumbSource {
    name: String,
    class: SizeClass,
    extensions: Vec<String>,
    ffmpeg: String,
}

impl VideoThumbSource {
    pub fn new(name: String, class: SizeClass, extensions: Vec<String>) -> Self {
        VideoThumbSource {
            name,
            class,
            extensions,
            ffmpeg: "ffmpeg".to_string(),
        }
    }

    #[cfg(test)]
    fn with_command(mut self, ffmpeg: &str) -> Self {
        self.ffmpeg = ffmpeg.to_string();
        self
    }
}

impl Source for VideoThumbSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> &SizeClass {
        &self.class
    }

    fn exists(&self, _id: ImageId, path: &Path) -> bool {
        path.is_file() && extension_matches(path, &self.extensions)
    }
}

impl ReadableSource for VideoThumbSource {
    fn read(&self, ctx: &Cancel, _id: ImageId, path: &Path) -> Result<Vec<u8>> {
        if ctx.is_cancelled() {
            return Err(Error::transient(anyhow::anyhow!("cancelled")));
        }
        // Decode-to-fit keeps aspect ratio: scale the long edge down to
        // the class box, never up (min() guards small clips).
        let filter = format!(
            "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease",
            w = self.class.width,
            h = self.class.height,
        );
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-vf", &filter])
            .args(["-f", "image2", "-c:v", "mjpeg", "pipe:1"])
            .output()
            .map_err(|e| {
                Error::transient(anyhow::anyhow!("cannot run {}: {}", self.ffmpeg, e))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::transient(anyhow::anyhow!(
                "{} failed for {:?}: {}",
                self.ffmpeg,
                path,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::transient(anyhow::anyhow!(
                "{} produced no frame for {:?}",
                self.ffmpeg,
                path
            )));
        }
        Ok(output.stdout)
    }
}
