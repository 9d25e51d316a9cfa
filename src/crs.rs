//! Coordinate transforms between reference systems.

use crate::error::{Result, StoreError};
use crate::types::{Coordinate, Crs, Envelope, Geometry};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::sync::Arc;

const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude bound of the square Web Mercator world.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Points sampled per envelope edge when transforming envelopes.
const ENVELOPE_DENSIFY: usize = 8;

/// Maps coordinates from one reference system into another.
pub trait CoordinateTransform: Send + Sync {
    fn transform(&self, c: Coordinate) -> Result<Coordinate>;
}

struct Identity;

impl CoordinateTransform for Identity {
    fn transform(&self, c: Coordinate) -> Result<Coordinate> {
        Ok(c)
    }
}

/// Geographic degrees (lon/lat) to spherical Web Mercator meters.
struct WgsToMercator;

impl CoordinateTransform for WgsToMercator {
    fn transform(&self, c: Coordinate) -> Result<Coordinate> {
        let lat = c.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
        let x = EARTH_RADIUS * c.x.to_radians();
        let y = EARTH_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        Ok(Coordinate::new(x, y))
    }
}

struct MercatorToWgs;

impl CoordinateTransform for MercatorToWgs {
    fn transform(&self, c: Coordinate) -> Result<Coordinate> {
        let lon = (c.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (c.y / EARTH_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
        Ok(Coordinate::new(lon, lat))
    }
}

/// Look up a transform between two reference systems.
pub fn find_transform(source: &Crs, target: &Crs) -> Result<Arc<dyn CoordinateTransform>> {
    if source == target {
        return Ok(Arc::new(Identity));
    }
    if *source == Crs::wgs84() && *target == Crs::web_mercator() {
        return Ok(Arc::new(WgsToMercator));
    }
    if *source == Crs::web_mercator() && *target == Crs::wgs84() {
        return Ok(Arc::new(MercatorToWgs));
    }
    Err(StoreError::Unsupported(format!(
        "no coordinate transform from {} to {}",
        source, target
    )))
}

pub fn transform_geometry(geometry: &Geometry, transform: &dyn CoordinateTransform) -> Result<Geometry> {
    geometry.try_map_coordinates(|c| transform.transform(c))
}

/// Transform an envelope by sampling points along each edge, so curved images of
/// straight edges are still covered.
pub fn transform_envelope(envelope: &Envelope, transform: &dyn CoordinateTransform) -> Result<Envelope> {
    let mut result: Option<Envelope> = None;
    for i in 0..=ENVELOPE_DENSIFY {
        let t = i as f64 / ENVELOPE_DENSIFY as f64;
        let x = envelope.min_x + t * envelope.width();
        let y = envelope.min_y + t * envelope.height();
        for c in [
            Coordinate::new(x, envelope.min_y),
            Coordinate::new(x, envelope.max_y),
            Coordinate::new(envelope.min_x, y),
            Coordinate::new(envelope.max_x, y),
        ] {
            let mapped = transform.transform(c)?;
            result = Envelope::union(result, Some(Envelope::of_coordinate(mapped)));
        }
    }
    // The loop always visits at least the four corners.
    result.ok_or_else(|| StoreError::Unsupported("empty envelope transform".into()))
}
