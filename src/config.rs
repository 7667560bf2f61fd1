//! Provider configuration
//!
//! The host hands the provider a loosely typed YAML mapping. It is resolved
//! once, up front, into a [`ProviderConfig`] with every default filled in, so
//! nothing downstream has to look keys up dynamically.
//!
//! ```yaml
//! host: localhost
//! port: 9200
//! srid: 4326
//! layers:
//!   - name: jobs
//!     geometry_fieldname: location
//!     id_fieldname: job_id
//!     fields: [profession, category]
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ConfigError;
use crate::projection::WEB_MERCATOR;
use crate::query::QueryTemplate;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9200;
pub const DEFAULT_SRID: i32 = WEB_MERCATOR;
pub const DEFAULT_MAX_CONNECTION: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Elasticsearch's default `index.max_result_window`.
pub const DEFAULT_MAX_FEATURES: u32 = 10_000;
pub const DEFAULT_ID_FIELD: &str = "gid";
pub const DEFAULT_GEOMETRY_FIELD: &str = "geom";

const KEY_LAYERS: &str = "layers";
const KEY_LAYER_NAME: &str = "name";
const KEY_TIMEOUT: &str = "timeout";
const KEY_MAX_FEATURES: &str = "max_features";

/// Connection level settings, shared by every layer of a provider.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional path prefix, for clusters served behind a proxy.
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Idle connections kept per host.
    #[serde(rename = "max_connection", default = "default_max_connection")]
    pub max_connections: usize,
    #[serde(default = "default_srid")]
    pub srid: i32,
    /// Search timeout in seconds.
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_features")]
    pub max_features: u32,
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: default_host(),
            port: DEFAULT_PORT,
            database: None,
            user: None,
            password: None,
            max_connections: DEFAULT_MAX_CONNECTION,
            srid: DEFAULT_SRID,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

fn default_host() -> String {
    String::from(DEFAULT_HOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connection() -> usize {
    DEFAULT_MAX_CONNECTION
}

fn default_srid() -> i32 {
    DEFAULT_SRID
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_features() -> u32 {
    DEFAULT_MAX_FEATURES
}

/// A layer entry exactly as written in the configuration.
#[derive(Deserialize, Debug)]
struct LayerEntry {
    name: Option<String>,
    tablename: Option<String>,
    sql: Option<String>,
    #[serde(default)]
    fields: Vec<String>,
    geometry_fieldname: Option<String>,
    id_fieldname: Option<String>,
    srid: Option<i32>,
}

/// A fully resolved layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerConfig {
    pub name: String,
    /// The index documents are searched in (`tablename`).
    pub index: String,
    /// Custom search body (`sql`), if one is in use.
    pub query_template: Option<QueryTemplate>,
    pub id_field: String,
    pub geometry_field: String,
    /// Attributes copied onto features. Empty means every scalar field.
    pub fields: Vec<String>,
    /// The spatial reference documents are stored in.
    pub srid: i32,
}

/// A validated provider configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderConfig {
    pub connection: ConnectionConfig,
    /// Layers, in configuration order.
    pub layers: Vec<LayerConfig>,
}

impl ProviderConfig {
    /// Resolves a provider configuration from a YAML string.
    pub fn from_yaml(data: &str) -> Result<ProviderConfig, ConfigError> {
        let value: Value = serde_yaml::from_str(data)?;
        ProviderConfig::resolve(&value)
    }

    /// Resolves a provider configuration from a generic mapping, filling in
    /// defaults and validating every layer. Nothing is returned unless the
    /// whole configuration is valid.
    pub fn resolve(config: &Value) -> Result<ProviderConfig, ConfigError> {
        if !config.is_mapping() {
            return Err(ConfigError::ConfigShape {
                key: String::from("provider configuration"),
                expected: "mapping",
            });
        }

        let entries = config
            .get(KEY_LAYERS)
            .and_then(Value::as_sequence)
            .filter(|entries| entries.iter().all(Value::is_mapping))
            .ok_or_else(|| ConfigError::ConfigShape {
                key: String::from(KEY_LAYERS),
                expected: "sequence of mappings",
            })?;

        let connection: ConnectionConfig = serde_yaml::from_value(config.clone())?;
        if connection.timeout_secs == 0 {
            return Err(ConfigError::NotPositive { key: KEY_TIMEOUT });
        }
        if connection.max_features == 0 {
            return Err(ConfigError::NotPositive {
                key: KEY_MAX_FEATURES,
            });
        }

        let mut layers = Vec::with_capacity(entries.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (i, entry) in entries.iter().enumerate() {
            let entry: LayerEntry = serde_yaml::from_value(entry.clone())
                .map_err(|source| ConfigError::InvalidLayer { index: i, source })?;

            let layer = resolve_layer(i, entry, connection.srid, &mut seen)?;
            layers.push(layer);
        }

        Ok(ProviderConfig { connection, layers })
    }
}

fn resolve_layer(
    index: usize,
    entry: LayerEntry,
    default_srid: i32,
    seen: &mut HashMap<String, usize>,
) -> Result<LayerConfig, ConfigError> {
    let name = non_empty(entry.name).ok_or(ConfigError::MissingField {
        index,
        field: KEY_LAYER_NAME,
    })?;

    if let Some(&first) = seen.get(&name) {
        return Err(ConfigError::DuplicateLayer {
            name,
            first,
            second: index,
        });
    }
    seen.insert(name.clone(), index);

    let geometry_field =
        non_empty(entry.geometry_fieldname).unwrap_or_else(|| String::from(DEFAULT_GEOMETRY_FIELD));
    let id_field = non_empty(entry.id_fieldname).unwrap_or_else(|| String::from(DEFAULT_ID_FIELD));
    if id_field == geometry_field {
        return Err(ConfigError::ConflictingFields {
            index,
            name,
            field: id_field,
        });
    }

    let index_name = non_empty(entry.tablename).unwrap_or_else(|| name.clone());
    let sql = non_empty(entry.sql);

    // The table name wins when both are given
    let query_template = match sql {
        Some(_) if index_name != name => {
            tracing::warn!(
                layer = %name,
                index,
                "Both tablename and sql fields are specified, using only the tablename field"
            );
            None
        }
        Some(sql) => Some(QueryTemplate::parse(&sql).map_err(|reason| {
            ConfigError::InvalidQueryTemplate {
                index,
                name: name.clone(),
                reason,
            }
        })?),
        None => None,
    };

    Ok(LayerConfig {
        name,
        index: index_name,
        query_template,
        id_field,
        geometry_field,
        fields: entry.fields,
        srid: entry.srid.unwrap_or(default_srid),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}
