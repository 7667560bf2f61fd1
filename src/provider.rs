//! The Elasticsearch tile provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryFutureExt;
use geo_types::Point;

use crate::client::{ElasticsearchClient, SearchClient};
use crate::config::{LayerConfig, ProviderConfig};
use crate::error::{ConfigError, Error, SearchError};
use crate::layer::{materialize, GeoPointReader, GeometryReader, TileLayer};
use crate::projection::{to_storage_crs, Corner, TileExtent};
use crate::query::EnvelopeQuery;
use crate::TileProvider;

/// Serves tile layers out of geo documents in Elasticsearch indexes.
///
/// Layers are fixed at construction, so a provider can be shared freely
/// between concurrent tile requests.
pub struct ElasticsearchProvider {
    layers: HashMap<String, LayerConfig>,
    srid: i32,
    max_features: u32,
    timeout: Duration,
    client: Arc<dyn SearchClient>,
    default_reader: Arc<dyn GeometryReader>,
    readers: HashMap<String, Arc<dyn GeometryReader>>,
}

impl ElasticsearchProvider {
    /// Builds a provider around an already resolved configuration and a
    /// search client.
    pub fn new(config: ProviderConfig, client: Arc<dyn SearchClient>) -> ElasticsearchProvider {
        let layers = config
            .layers
            .into_iter()
            .map(|layer| (layer.name.clone(), layer))
            .collect();

        ElasticsearchProvider {
            layers,
            srid: config.connection.srid,
            max_features: config.connection.max_features,
            timeout: config.connection.timeout(),
            client,
            default_reader: Arc::new(GeoPointReader),
            readers: HashMap::new(),
        }
    }

    /// Resolves the configuration and connects an HTTP client to the
    /// configured cluster.
    pub fn from_config(config: &serde_yaml::Value) -> Result<ElasticsearchProvider, ConfigError> {
        let config = ProviderConfig::resolve(config)?;
        let client = ElasticsearchClient::new(&config.connection).map_err(ConfigError::Client)?;

        tracing::debug!(
            host = %config.connection.host,
            layers = config.layers.len(),
            "Elasticsearch provider configured"
        );

        Ok(ElasticsearchProvider::new(config, Arc::new(client)))
    }

    /// Overrides how geometries are read for one layer.
    pub fn with_geometry_reader<R>(mut self, layer: &str, reader: R) -> ElasticsearchProvider
    where
        R: GeometryReader + 'static,
    {
        self.readers.insert(layer.to_owned(), Arc::new(reader));
        self
    }

    /// Overrides the configured search timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> ElasticsearchProvider {
        self.timeout = timeout;
        self
    }

    /// The provider wide default SRID.
    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.get(name)
    }

    fn reader(&self, layer: &str) -> &dyn GeometryReader {
        self.readers
            .get(layer)
            .unwrap_or(&self.default_reader)
            .as_ref()
    }

    fn corner(
        &self,
        layer: &LayerConfig,
        corner: Corner,
        point: Point<f64>,
    ) -> Result<Point<f64>, Error> {
        to_storage_crs(layer.srid, point).map_err(|source| Error::Transform {
            layer: layer.name.clone(),
            corner,
            source,
        })
    }
}

#[async_trait]
impl TileProvider for ElasticsearchProvider {
    fn layer_names(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    async fn tile_layer(&self, layer_name: &str, tile: &TileExtent) -> Result<TileLayer, Error> {
        let layer = self
            .layers
            .get(layer_name)
            .ok_or_else(|| Error::UnknownLayer(layer_name.to_owned()))?;

        let lower_left = self.corner(layer, Corner::LowerLeft, tile.lower_left())?;
        let upper_right = self.corner(layer, Corner::UpperRight, tile.upper_right())?;

        let query = EnvelopeQuery::build(layer, lower_left, upper_right, self.max_features);
        tracing::debug!(layer = %layer.name, index = %query.index, "Querying tile envelope");

        let search = self
            .client
            .execute(&query)
            .map_err(|source| Error::QueryFailed {
                layer: layer.name.clone(),
                source,
            });
        let documents = match tokio::time::timeout(self.timeout, search).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::QueryFailed {
                    layer: layer.name.clone(),
                    source: SearchError::Timeout(self.timeout),
                })
            }
        };

        Ok(materialize(layer, documents, self.reader(&layer.name)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use assert_approx_eq::assert_approx_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::error::RecordError;
    use crate::layer::{AttributeValue, SearchRecord};

    /// Answers every query with the same documents and remembers the queries.
    struct StaticClient {
        documents: Vec<Value>,
        calls: AtomicUsize,
        queries: Mutex<Vec<EnvelopeQuery>>,
    }

    impl StaticClient {
        fn new(documents: Vec<Value>) -> Arc<StaticClient> {
            Arc::new(StaticClient {
                documents,
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchClient for StaticClient {
        async fn execute(&self, query: &EnvelopeQuery) -> Result<Vec<Value>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.documents.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl SearchClient for FailingClient {
        async fn execute(&self, _query: &EnvelopeQuery) -> Result<Vec<Value>, SearchError> {
            Err(SearchError::Status {
                status: 503,
                body: String::from("cluster unavailable"),
            })
        }
    }

    struct SlowClient;

    #[async_trait]
    impl SearchClient for SlowClient {
        async fn execute(&self, _query: &EnvelopeQuery) -> Result<Vec<Value>, SearchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    /// Reads geometry from separate `x`/`y` fields.
    struct SplitFieldReader;

    impl GeometryReader for SplitFieldReader {
        fn read(&self, record: &SearchRecord, _field: &str) -> Result<Point<f64>, RecordError> {
            let x = record.get("x").and_then(Value::as_f64);
            let y = record.get("y").and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Point::new(x, y)),
                _ => Err(RecordError::MissingGeometry(String::from("x/y"))),
            }
        }
    }

    fn provider(yaml: &str, client: Arc<dyn SearchClient>) -> ElasticsearchProvider {
        let config = ProviderConfig::from_yaml(yaml).unwrap();
        ElasticsearchProvider::new(config, client)
    }

    const JOBS: &str = "layers:\n  - name: jobs\n    geometry_fieldname: geom\n    id_fieldname: gid\n";

    #[test]
    fn test_layer_names() {
        let yaml = "layers:\n  - name: jobs\n  - name: offices\n  - name: depots\n";
        let provider = provider(yaml, StaticClient::new(vec![]));

        let mut names = provider.layer_names();
        names.sort();
        assert_eq!(vec!["depots", "jobs", "offices"], names);
        assert_eq!(3857, provider.srid());
    }

    #[tokio::test]
    async fn test_jobs_scenario() {
        let client = StaticClient::new(vec![json!({
            "gid": 7,
            "geom": "52.52,13.40",
            "user": "Acme",
            "profession": "Welder",
        })]);
        let yaml = "srid: 4326\nlayers:\n  - name: jobs\n    geometry_fieldname: geom\n    id_fieldname: gid\n";
        let provider = provider(yaml, client.clone());

        assert_eq!(vec!["jobs"], provider.layer_names());

        match provider.tile_layer("other", &TileExtent::from_tile(0, 0, 0)).await {
            Err(Error::UnknownLayer(name)) => assert_eq!("other", name),
            other => panic!("Expected an unknown layer error, got {:?}", other),
        }
        assert_eq!(0, client.calls());

        let layer = provider
            .tile_layer("jobs", &TileExtent::from_tile(10, 550, 335))
            .await
            .unwrap();
        assert_eq!(1, client.calls());
        assert_eq!("jobs", layer.name);
        assert_eq!(1, layer.features.len());

        let feature = &layer.features[0];
        assert_eq!(Some(7), feature.id);
        assert_eq!(Some(&AttributeValue::from("Acme")), feature.tags.get("user"));
        assert_eq!(Some(&AttributeValue::from("Welder")), feature.tags.get("profession"));
    }

    #[tokio::test]
    async fn test_query_envelope_is_in_storage_crs() {
        let client = StaticClient::new(vec![]);
        let yaml = "srid: 4326\nlayers:\n  - name: jobs\n    geometry_fieldname: location\n";
        let provider = provider(yaml, client.clone());

        provider
            .tile_layer("jobs", &TileExtent::from_tile(1, 1, 0))
            .await
            .unwrap();

        let queries = client.queries.lock().unwrap();
        let bbox = &queries[0].body["query"]["bool"]["filter"]["geo_bounding_box"]["location"];
        assert_approx_eq!(0.0, bbox["bottom_left"]["lon"].as_f64().unwrap(), 1e-9);
        assert_approx_eq!(0.0, bbox["bottom_left"]["lat"].as_f64().unwrap(), 1e-9);
        assert_approx_eq!(180.0, bbox["top_right"]["lon"].as_f64().unwrap(), 1e-9);
        assert_approx_eq!(85.0511287798, bbox["top_right"]["lat"].as_f64().unwrap(), 1e-9);
        assert_eq!(10_000, queries[0].body["size"]);
    }

    #[tokio::test]
    async fn test_malformed_record_is_dropped() {
        let client = StaticClient::new(vec![
            json!({ "gid": 1, "geom": [0.0, 0.0], "user": "Acme" }),
            json!({ "gid": 2, "geom": "not a point" }),
        ]);
        let provider = provider(JOBS, client);

        let layer = provider
            .tile_layer("jobs", &TileExtent::from_tile(0, 0, 0))
            .await
            .unwrap();
        assert_eq!(1, layer.features.len());
        assert_eq!(Some(1), layer.features[0].id);
    }

    #[tokio::test]
    async fn test_no_matches_is_an_empty_layer() {
        let provider = provider(JOBS, StaticClient::new(vec![]));

        let layer = provider
            .tile_layer("jobs", &TileExtent::from_tile(3, 1, 1))
            .await
            .unwrap();
        assert_eq!("jobs", layer.name);
        assert!(layer.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_projection() {
        let client = StaticClient::new(vec![]);
        let yaml = "layers:\n  - name: swiss\n    srid: 2056\n";
        let provider = provider(yaml, client.clone());

        match provider.tile_layer("swiss", &TileExtent::from_tile(0, 0, 0)).await {
            Err(Error::Transform {
                layer,
                corner,
                source,
            }) => {
                assert_eq!("swiss", layer);
                assert_eq!(Corner::LowerLeft, corner);
                assert_eq!(
                    crate::error::TransformError::UnsupportedProjection(2056),
                    source
                );
            }
            other => panic!("Expected a transform error, got {:?}", other),
        }
        assert_eq!(0, client.calls());
    }

    #[tokio::test]
    async fn test_query_failure() {
        let provider = provider(JOBS, Arc::new(FailingClient));

        match provider.tile_layer("jobs", &TileExtent::from_tile(0, 0, 0)).await {
            Err(Error::QueryFailed {
                layer,
                source: SearchError::Status { status, .. },
            }) => {
                assert_eq!("jobs", layer);
                assert_eq!(503, status);
            }
            other => panic!("Expected a query failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let provider =
            provider(JOBS, Arc::new(SlowClient)).with_timeout(Duration::from_millis(20));

        assert!(matches!(
            provider.tile_layer("jobs", &TileExtent::from_tile(0, 0, 0)).await,
            Err(Error::QueryFailed {
                source: SearchError::Timeout(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_custom_geometry_reader() {
        let client = StaticClient::new(vec![json!({ "gid": 1, "x": 100.0, "y": -50.0 })]);
        let yaml = "layers:\n  - name: jobs\n  - name: offices\n";
        let provider = provider(yaml, client).with_geometry_reader("offices", SplitFieldReader);

        let tile = TileExtent::from_tile(0, 0, 0);
        let offices = provider.tile_layer("offices", &tile).await.unwrap();
        assert_eq!(1, offices.features.len());
        assert_eq!(Point::new(100.0, -50.0), offices.features[0].geometry);

        // Other layers keep reading geo_points
        let jobs = provider.tile_layer("jobs", &tile).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests() {
        let client = StaticClient::new(vec![json!({ "geom": "0.0,0.0" })]);
        let yaml = "srid: 4326\nlayers:\n  - name: jobs\n  - name: offices\n";
        let provider = Arc::new(provider(yaml, client.clone()));

        let requests = (0..16).map(|i| {
            let provider = provider.clone();
            let name = if i % 2 == 0 { "jobs" } else { "offices" };
            async move {
                provider
                    .tile_layer(name, &TileExtent::from_tile(2, i % 4, 1))
                    .await
            }
        });

        let layers = futures::future::join_all(requests).await;
        assert_eq!(16, client.calls());
        for layer in layers {
            assert_eq!(1, layer.unwrap().features.len());
        }
    }
}
