//! Query interface to the reverse-geocoding collaborator. Only enabled
//! through configuration; the metadata indexer treats `Unavailable` as
//! "leave the location empty".

use crate::error::{Error, Result};

pub trait ReverseGeocoder: Send + Sync {
    /// Human-readable place name for a coordinate, `None` when the
    /// coordinate resolves to nothing useful (open ocean, bad fix).
    fn locate(&self, lat: f64, lon: f64) -> Result<Option<String>>;
}

/// Placeholder used when `geo.reverse_geocode` is off.
pub struct DisabledGeocoder;

impl ReverseGeocoder for DisabledGeocoder {
    fn locate(&self, _lat: f64, _lon: f64) -> Result<Option<String>> {
        Err(Error::Unavailable("reverse geocoding"))
    }
}
