//! Tile layers and the translation of search documents into features.

use std::collections::BTreeMap;

use geo_types::Point;
use serde::Deserialize;
use serde_json::Value;

use crate::config::LayerConfig;
use crate::error::RecordError;
use crate::projection::to_tile_crs;

/// An attribute value, restricted to the kinds a vector tile can carry.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Converts a scalar JSON value. Nulls, arrays and objects have no
    /// tile representation and yield `None`.
    fn from_json(value: &Value) -> Option<AttributeValue> {
        match value {
            Value::String(s) => Some(AttributeValue::String(s.clone())),
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(AttributeValue::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Some(AttributeValue::Int(i))
                } else {
                    n.as_f64().map(AttributeValue::Float)
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

/// A single feature, with its geometry in tile space (EPSG:3857).
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: Option<u64>,
    pub geometry: Point<f64>,
    pub tags: BTreeMap<String, AttributeValue>,
}

/// A named collection of features, ready for a vector tile encoder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileLayer {
    pub name: String,
    pub features: Vec<Feature>,
}

impl TileLayer {
    pub fn new(name: &str) -> TileLayer {
        TileLayer {
            name: name.to_owned(),
            features: Vec::new(),
        }
    }

    pub fn add_feature(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// One matched document, as a flat bag of fields.
#[derive(Clone, Deserialize, Debug)]
#[serde(transparent)]
pub struct SearchRecord {
    fields: BTreeMap<String, Value>,
}

impl SearchRecord {
    pub fn from_document(document: Value) -> Result<SearchRecord, RecordError> {
        Ok(serde_json::from_value(document)?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Reads the numeric feature id from `field`, accepting unsigned integers
    /// and numeric strings.
    fn id(&self, field: &str) -> Option<u64> {
        match self.fields.get(field)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn into_feature(
        self,
        layer: &LayerConfig,
        reader: &dyn GeometryReader,
    ) -> Result<Feature, RecordError> {
        let stored = reader.read(&self, &layer.geometry_field)?;
        let geometry = to_tile_crs(layer.srid, stored)?;
        let id = self.id(&layer.id_field);

        let tags = self
            .fields
            .into_iter()
            .filter(|(name, _)| *name != layer.id_field && *name != layer.geometry_field)
            .filter(|(name, _)| layer.fields.is_empty() || layer.fields.contains(name))
            .filter_map(|(name, value)| AttributeValue::from_json(&value).map(|v| (name, v)))
            .collect();

        Ok(Feature { id, geometry, tags })
    }
}

/// Extracts a record's point geometry, in the layer's storage spatial
/// reference. Layers storing geometry in an unusual shape can supply their
/// own implementation.
pub trait GeometryReader: Send + Sync {
    fn read(&self, record: &SearchRecord, field: &str) -> Result<Point<f64>, RecordError>;
}

/// Reads the encodings Elasticsearch accepts for a `geo_point`:
///
/// * `"lat,lon"` strings
/// * `{"lat": .., "lon": ..}` objects
/// * `[lon, lat]` arrays
/// * `"POINT (lon lat)"` well-known text
/// * GeoJSON `{"type": "Point", "coordinates": [lon, lat]}`
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoPointReader;

impl GeometryReader for GeoPointReader {
    fn read(&self, record: &SearchRecord, field: &str) -> Result<Point<f64>, RecordError> {
        let value = record
            .get(field)
            .filter(|v| !v.is_null())
            .ok_or_else(|| RecordError::MissingGeometry(field.to_owned()))?;

        let invalid = |reason: &str| RecordError::InvalidGeometry {
            field: field.to_owned(),
            reason: reason.to_owned(),
        };

        let point = match value {
            Value::String(s) => parse_point_string(s).ok_or_else(|| invalid(s.as_str())),
            Value::Array(coords) => {
                coordinate_pair(coords).ok_or_else(|| invalid("expected [lon, lat]"))
            }
            Value::Object(fields) => match fields.get("type") {
                Some(Value::String(kind)) if kind.eq_ignore_ascii_case("point") => fields
                    .get("coordinates")
                    .and_then(Value::as_array)
                    .and_then(|coords| coordinate_pair(coords))
                    .ok_or_else(|| invalid("expected GeoJSON coordinates [lon, lat]")),
                Some(Value::String(kind)) => Err(RecordError::GeometryShapeMismatch(kind.clone())),
                _ => {
                    let lat = fields.get("lat").and_then(Value::as_f64);
                    let lon = fields.get("lon").and_then(Value::as_f64);
                    match (lon, lat) {
                        (Some(lon), Some(lat)) => Ok(Point::new(lon, lat)),
                        _ => Err(invalid("expected {lat, lon}")),
                    }
                }
            },
            _ => Err(invalid("unsupported geo_point encoding")),
        }?;

        // geo_points are always degrees
        if !point.x().is_finite() || !point.y().is_finite() {
            return Err(invalid("coordinates must be finite"));
        }
        if point.x().abs() > 180.0 || point.y().abs() > 90.0 {
            return Err(invalid("coordinates out of range"));
        }

        Ok(point)
    }
}

fn coordinate_pair(coords: &[Value]) -> Option<Point<f64>> {
    match coords {
        [lon, lat] | [lon, lat, _] => Some(Point::new(lon.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

fn parse_point_string(s: &str) -> Option<Point<f64>> {
    let s = s.trim();

    if let Some(wkt) = strip_prefix_ignore_case(s, "POINT") {
        let inner = wkt.trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut parts = inner.split_whitespace();
        let lon: f64 = parts.next()?.parse().ok()?;
        let lat: f64 = parts.next()?.parse().ok()?;
        return Some(Point::new(lon, lat));
    }

    let (lat, lon) = s.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    Some(Point::new(lon, lat))
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

/// Builds the tile layer for `layer` out of raw search documents. Documents
/// that cannot be turned into a feature are logged and skipped, so a few bad
/// records only ever cost their own features.
pub fn materialize(
    layer: &LayerConfig,
    documents: Vec<Value>,
    reader: &dyn GeometryReader,
) -> TileLayer {
    let mut tile_layer = TileLayer::new(&layer.name);
    let total = documents.len();

    for (i, document) in documents.into_iter().enumerate() {
        let feature =
            SearchRecord::from_document(document).and_then(|record| record.into_feature(layer, reader));

        match feature {
            Ok(feature) => tile_layer.add_feature(feature),
            Err(e) => {
                tracing::debug!(layer = %layer.name, record = i, error = %e, "Skipping record");
            }
        }
    }

    let skipped = total - tile_layer.features.len();
    if skipped > 0 {
        tracing::warn!(
            layer = %layer.name,
            skipped,
            total,
            "Some records could not be turned into features"
        );
    }

    tile_layer
}
