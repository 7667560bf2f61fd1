//! # Tile Sorcerer (Elasticsearch)
//!
//! Serves vector tile layers out of geo documents stored in Elasticsearch.
//!
//! ## Current features
//!
//! Given an Elasticsearch cluster and a set of layer definitions, this crate
//! turns each tile request into a `geo_bounding_box` search against the
//! layer's index and assembles the hits into a [`TileLayer`] of point
//! features, ready for a Mapbox Vector Tile encoder.
//!
//! Each layer names its index, the fields holding the feature id and
//! geometry, the spatial reference its documents are stored in, and
//! optionally a custom search body with a `"!BBOX!"` placeholder.
//!
//! ## Known Limitations
//!
//! Only point geometries (Elasticsearch `geo_point`s) are read by default,
//! and only web mercator (EPSG:3857) and WGS84 (EPSG:4326) storage
//! projections are supported. Geometries are neither clipped nor simplified;
//! that is up to the tile encoder.
//!
//! Connection pooling, retries and authentication are left to the
//! [`SearchClient`] in use. The bundled [`ElasticsearchClient`] is
//! deliberately thin.
//!
//! ## Usage
//!
//! ```no_run
//! use tile_sorcerer_elastic::{ElasticsearchProvider, TileExtent, TileProvider};
//!
//! # async fn render() -> Result<(), Box<dyn std::error::Error>> {
//! let config: serde_yaml::Value = serde_yaml::from_str("srid: 4326\nlayers:\n  - name: jobs\n")?;
//! let provider = ElasticsearchProvider::from_config(&config)?;
//! let layer = provider.tile_layer("jobs", &TileExtent::from_tile(10, 550, 335)).await?;
//! println!("{} features", layer.features.len());
//! # Ok(())
//! # }
//! ```

#![deny(warnings)]

use async_trait::async_trait;

pub mod client;
pub mod config;
pub mod error;
pub mod layer;
pub mod projection;
pub mod provider;
pub mod query;
pub mod registry;

pub use client::{ElasticsearchClient, SearchClient};
pub use config::{LayerConfig, ProviderConfig};
pub use error::Error;
pub use layer::{AttributeValue, Feature, TileLayer};
pub use projection::TileExtent;
pub use provider::ElasticsearchProvider;
pub use registry::{ProviderConstructor, ProviderRegistry};

/// The name this crate's provider registers under.
pub const PROVIDER_NAME: &str = "elasticsearch";

/// This is the main trait exported by this crate: a source of tile layers,
/// addressed by layer name.
#[async_trait]
pub trait TileProvider: Send + Sync {
    /// Names of every layer this provider can serve, in no particular order.
    fn layer_names(&self) -> Vec<String>;

    /// Builds the named layer for the tile covering `tile`. An area without
    /// data yields an empty layer, not an error.
    async fn tile_layer(&self, layer_name: &str, tile: &TileExtent) -> Result<TileLayer, Error>;
}

fn construct_elasticsearch(
    config: &serde_yaml::Value,
) -> Result<Box<dyn TileProvider>, error::ConfigError> {
    Ok(Box::new(ElasticsearchProvider::from_config(config)?))
}

/// Registers the Elasticsearch provider with a host's registry. Returns the
/// constructor previously registered under [`PROVIDER_NAME`], if any.
pub fn register(registry: &mut ProviderRegistry) -> Option<ProviderConstructor> {
    registry.register(PROVIDER_NAME, construct_elasticsearch)
}
