//! Metadata worker: image dimensions from the file header, EXIF fields
//! through a bounded reader pool, configured date formats tried in
//! order, optional reverse geocoding, and a MERGE write back into the
//! catalog. Idempotent: re-running on an indexed item is a no-op write.

use crate::catalog::{Catalog, Info, MissingInfo, WriteMode};
use crate::geo::ReverseGeocoder;
use chrono::{NaiveDateTime, TimeZone, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::Path;
use std::sync::Arc;

/// Bounds concurrent EXIF reader invocations across every worker.
/// Acquire by receiving a token, release by dropping the permit.
pub struct ExifPool {
    tokens: Receiver<()>,
    returns: Sender<()>,
}

pub struct ExifPermit<'a> {
    pool: &'a ExifPool,
}

impl ExifPool {
    pub fn new(count: usize) -> ExifPool {
        let count = count.max(1);
        let (tx, rx) = bounded(count);
        for _ in 0..count {
            tx.send(()).expect("fresh channel has capacity");
        }
        ExifPool {
            tokens: rx,
            returns: tx,
        }
    }

    pub fn acquire(&self) -> ExifPermit<'_> {
        let _ = self.tokens.recv();
        ExifPermit { pool: self }
    }
}

impl Drop for ExifPermit<'_> {
    fn drop(&mut self) {
        let _ = self.pool.returns.send(());
    }
}

struct ExifFields {
    date_string: Option<String>,
    orientation: u16,
    lat: Option<f64>,
    lon: Option<f64>,
}

pub struct MetaIndexer {
    catalog: Catalog,
    pool: Arc<ExifPool>,
    date_formats: Vec<String>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
}

impl MetaIndexer {
    pub fn new(
        catalog: Catalog,
        pool: Arc<ExifPool>,
        date_formats: Vec<String>,
        geocoder: Option<Arc<dyn ReverseGeocoder>>,
    ) -> MetaIndexer {
        MetaIndexer {
            catalog,
            pool,
            date_formats,
            geocoder,
        }
    }

    /// Queue worker entry point: failures log and continue.
    pub fn index(&self, item: &MissingInfo) {
        if !item.missing.metadata {
            return;
        }
        match self.extract(&item.path) {
            Ok(info) => self.catalog.write(&item.path, info, WriteMode::Merge),
            Err(e) => {
                tracing::warn!("metadata for {:?}: {}", item.path, e);
            }
        }
    }

    fn extract(&self, path: &Path) -> crate::error::Result<Info> {
        let mut info = Info::default();
        let (width, height) = image::image_dimensions(path)?;
        info.width = width;
        info.height = height;

        let fields = {
            let _permit = self.pool.acquire();
            read_exif_fields(path)
        };
        if let Some(fields) = fields {
            info.orientation = fields.orientation;
            if let Some(date) = &fields.date_string {
                match self.parse_date(date) {
                    Some(taken_at) => info.taken_at = taken_at,
                    None => tracing::debug!("no date format matched {:?} in {:?}", date, path),
                }
            }
            info.lat = fields.lat;
            info.lon = fields.lon;
            if let (Some(geocoder), Some(lat), Some(lon)) =
                (self.geocoder.as_deref(), fields.lat, fields.lon)
            {
                match geocoder.locate(lat, lon) {
                    Ok(location) => info.location = location,
                    Err(e) => tracing::debug!("reverse geocode ({}, {}): {}", lat, lon, e),
                }
            }
        }
        Ok(info)
    }

    /// Try the configured formats in order; first parse wins. Timestamps
    /// carry no zone in EXIF, so they are taken as UTC.
    fn parse_date(&self, s: &str) -> Option<chrono::DateTime<Utc>> {
        let s = s.trim();
        for format in &self.date_formats {
            if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
        None
    }
}

/// Read the EXIF fields this pipeline cares about. `None` when the file
/// has no parseable EXIF block; never panics.
fn read_exif_fields(path: &Path) -> Option<ExifFields> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let date_string = read_ascii(&exif, exif::Tag::DateTimeOriginal)
        .or_else(|| read_ascii(&exif, exif::Tag::DateTime));
    let orientation = match exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .map(|f| &f.value)
    {
        Some(exif::Value::Short(v)) => v.first().copied().unwrap_or(0),
        _ => 0,
    };
    let lat = read_coordinate(&exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, "S");
    let lon = read_coordinate(&exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, "W");

    Some(ExifFields {
        date_string,
        orientation,
        lat,
        lon,
    })
}

fn read_ascii(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(vecs) => {
            let s = vecs
                .first()
                .and_then(|v| std::str::from_utf8(v).ok())?
                .trim()
                .to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        _ => None,
    }
}

/// Degrees-minutes-seconds rationals to signed decimal degrees.
fn read_coordinate(
    exif: &exif::Exif,
    tag: exif::Tag,
    ref_tag: exif::Tag,
    negative_ref: &str,
) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let dms = match &field.value {
        exif::Value::Rational(v) if v.len() >= 3 => v,
        _ => return None,
    };
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    let reference = exif
        .get_field(ref_tag, exif::In::PRIMARY)
        .and_then(|f| match &f.value {
            exif::Value::Ascii(vecs) => vecs
                .first()
                .and_then(|v| std::str::from_utf8(v).ok())
                .map(|s| s.trim().to_string()),
            _ => None,
        })?;
    if reference == negative_ref {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}
