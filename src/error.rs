use crate::projection::Corner;

/// Errors raised while resolving a provider configuration. Any of these
/// aborts provider construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid YAML in provider configuration.")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Expected {key} to be a {expected}")]
    ConfigShape { key: String, expected: &'static str },
    #[error("Expected {key} to be greater than zero")]
    NotPositive { key: &'static str },
    #[error("For layer({index}) the entry is malformed: {source}")]
    InvalidLayer {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("For layer({index}) the required {field} field is missing")]
    MissingField { index: usize, field: &'static str },
    #[error("{name} layer name is duplicated in both layer {second} and layer {first}")]
    DuplicateLayer {
        name: String,
        first: usize,
        second: usize,
    },
    #[error("For layer({index}) {name}: geometry_fieldname and id_fieldname are both {field}")]
    ConflictingFields {
        index: usize,
        name: String,
        field: String,
    },
    #[error("For layer({index}) {name}: invalid sql query template: {reason}")]
    InvalidQueryTemplate {
        index: usize,
        name: String,
        reason: String,
    },
    #[error("Unable to set up the search client: {0}")]
    Client(#[source] SearchError),
}

/// Errors raised by the coordinate transformer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("No known transform for SRID {0}")]
    UnsupportedProjection(i32),
}

/// Errors returned by a search backend.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Search backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unable to decode search response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Search timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Per-record failures. These never fail a tile; the record is dropped.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Document is not a flat object: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("Document has no {0} geometry field")]
    MissingGeometry(String),
    #[error("Field {field} is not a readable point: {reason}")]
    InvalidGeometry { field: String, reason: String },
    #[error("Expected Point geometry, got {0}")]
    GeometryShapeMismatch(String),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Errors for a single tile layer request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Don't know of the layer {0}")]
    UnknownLayer(String),
    #[error("Got error trying to convert the {corner} tile point for layer {layer}: {source}")]
    Transform {
        layer: String,
        corner: Corner,
        #[source]
        source: TransformError,
    },
    #[error("Got the following error running the query for layer {layer}: {source}")]
    QueryFailed {
        layer: String,
        #[source]
        source: SearchError,
    },
}

/// Errors raised when the host asks a registry for a provider.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No provider is registered under the name {0}")]
    UnknownProvider(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
