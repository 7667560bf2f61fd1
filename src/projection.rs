//! Conversions between the tile grid's native spatial reference (EPSG:3857
//! web mercator) and the spatial references documents are stored in.

use std::f64::consts::PI;
use std::fmt;

use geo_types::Point;

use crate::error::TransformError;

/// EPSG:3857, the spatial reference tiles are addressed in.
pub const WEB_MERCATOR: i32 = 3857;
/// Pre-EPSG code for web mercator, still seen in older configurations.
pub const LEGACY_WEB_MERCATOR: i32 = 900_913;
/// EPSG:4326, longitude/latitude in degrees. Elasticsearch `geo_point`s live here.
pub const WGS84: i32 = 4326;

const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Which corner of a tile extent a point came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corner {
    LowerLeft,
    UpperRight,
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corner::LowerLeft => write!(f, "lower left"),
            Corner::UpperRight => write!(f, "upper right"),
        }
    }
}

/// The bounding box of a tile in EPSG:3857 metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl TileExtent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> TileExtent {
        TileExtent {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Computes the extent of a slippy map tile in XYZ format.
    pub fn from_tile(zoom: u8, x: u32, y: u32) -> TileExtent {
        // tile2lonlat gives the north-west corner of a tile, so the south-east
        // corner is the north-west corner of the diagonal neighbour.
        let (west, north) = slippy_map_tilenames::tile2lonlat(x, y, zoom);
        let (east, south) = slippy_map_tilenames::tile2lonlat(x + 1, y + 1, zoom);

        let lower_left = lonlat_to_mercator(west, south);
        let upper_right = lonlat_to_mercator(east, north);

        TileExtent::new(
            lower_left.x(),
            lower_left.y(),
            upper_right.x(),
            upper_right.y(),
        )
    }

    pub fn lower_left(&self) -> Point<f64> {
        Point::new(self.min_x, self.min_y)
    }

    pub fn upper_right(&self) -> Point<f64> {
        Point::new(self.max_x, self.max_y)
    }
}

/// Converts a point in tile space (EPSG:3857) into the given storage SRID.
pub fn to_storage_crs(srid: i32, point: Point<f64>) -> Result<Point<f64>, TransformError> {
    match srid {
        WEB_MERCATOR | LEGACY_WEB_MERCATOR => Ok(point),
        WGS84 => Ok(mercator_to_lonlat(point.x(), point.y())),
        other => Err(TransformError::UnsupportedProjection(other)),
    }
}

/// Converts a point stored in the given SRID into tile space (EPSG:3857).
pub fn to_tile_crs(srid: i32, point: Point<f64>) -> Result<Point<f64>, TransformError> {
    match srid {
        WEB_MERCATOR | LEGACY_WEB_MERCATOR => Ok(point),
        WGS84 => Ok(lonlat_to_mercator(point.x(), point.y())),
        other => Err(TransformError::UnsupportedProjection(other)),
    }
}

fn lonlat_to_mercator(lon: f64, lat: f64) -> Point<f64> {
    // Web mercator is undefined at the poles
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    Point::new(x, y)
}

fn mercator_to_lonlat(x: f64, y: f64) -> Point<f64> {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    Point::new(lon, lat)
}
