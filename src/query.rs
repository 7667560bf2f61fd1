//! Bounding box queries over an Elasticsearch index.

use geo_types::Point;
use serde_json::{json, Map, Value};

use crate::config::LayerConfig;

/// Placeholder token in a layer's sql template. It is replaced by the
/// `geo_bounding_box` clause for the requested tile.
pub const BBOX_TOKEN: &str = "!BBOX!";

/// A layer's custom search body, with one or more `"!BBOX!"` string values
/// marking where the tile envelope goes.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryTemplate {
    body: Value,
}

impl QueryTemplate {
    /// Parses a JSON search body. The body must be an object and must
    /// contain the bbox token as a string value somewhere within it.
    pub fn parse(sql: &str) -> Result<QueryTemplate, String> {
        let body: Value = serde_json::from_str(sql).map_err(|e| e.to_string())?;

        if !body.is_object() {
            return Err(String::from("the search body must be a JSON object"));
        }
        if !contains_token(&body) {
            return Err(format!("the search body has no \"{}\" placeholder", BBOX_TOKEN));
        }

        Ok(QueryTemplate { body })
    }

    fn render(&self, bbox: &Value) -> Value {
        let mut body = self.body.clone();
        substitute_token(&mut body, bbox);
        body
    }
}

fn contains_token(value: &Value) -> bool {
    match value {
        Value::String(s) => s == BBOX_TOKEN,
        Value::Array(items) => items.iter().any(contains_token),
        Value::Object(fields) => fields.values().any(contains_token),
        _ => false,
    }
}

fn substitute_token(value: &mut Value, bbox: &Value) {
    match value {
        Value::String(s) if s == BBOX_TOKEN => *value = bbox.clone(),
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_token(v, bbox)),
        Value::Object(fields) => fields.values_mut().for_each(|v| substitute_token(v, bbox)),
        _ => {}
    }
}

/// A search request, ready to hand to a [`SearchClient`](crate::client::SearchClient).
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeQuery {
    /// The index to search.
    pub index: String,
    /// The JSON search body.
    pub body: Value,
}

impl EnvelopeQuery {
    /// Builds the query for the envelope spanned by two corners in the
    /// layer's storage spatial reference. `x` is longitude and `y` latitude.
    pub fn build(
        layer: &LayerConfig,
        lower_left: Point<f64>,
        upper_right: Point<f64>,
        max_features: u32,
    ) -> EnvelopeQuery {
        let bbox = geo_bounding_box(&layer.geometry_field, lower_left, upper_right);

        let body = match &layer.query_template {
            Some(template) => template.render(&bbox),
            None => {
                let mut body = Map::new();
                body.insert(String::from("size"), json!(max_features));
                body.insert(
                    String::from("query"),
                    json!({ "bool": { "filter": bbox } }),
                );
                if !layer.fields.is_empty() {
                    let mut source = vec![layer.id_field.clone(), layer.geometry_field.clone()];
                    source.extend(layer.fields.iter().cloned());
                    body.insert(String::from("_source"), json!(source));
                }
                Value::Object(body)
            }
        };

        EnvelopeQuery {
            index: layer.index.clone(),
            body,
        }
    }
}

fn geo_bounding_box(field: &str, lower_left: Point<f64>, upper_right: Point<f64>) -> Value {
    let mut corners = Map::new();
    corners.insert(
        field.to_owned(),
        json!({
            "top_right": { "lat": upper_right.y(), "lon": upper_right.x() },
            "bottom_left": { "lat": lower_left.y(), "lon": lower_left.x() },
        }),
    );

    json!({ "geo_bounding_box": Value::Object(corners) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(template: Option<QueryTemplate>, fields: Vec<String>) -> LayerConfig {
        LayerConfig {
            name: String::from("jobs"),
            index: String::from("jobs-v2"),
            query_template: template,
            id_field: String::from("gid"),
            geometry_field: String::from("location"),
            fields,
            srid: 4326,
        }
    }

    #[test]
    fn test_standard_query() {
        let query = EnvelopeQuery::build(
            &layer(None, vec![]),
            Point::new(-10.0, -5.0),
            Point::new(10.0, 5.0),
            500,
        );

        assert_eq!("jobs-v2", query.index);
        assert_eq!(
            json!({
                "size": 500,
                "query": { "bool": { "filter": { "geo_bounding_box": { "location": {
                    "top_right": { "lat": 5.0, "lon": 10.0 },
                    "bottom_left": { "lat": -5.0, "lon": -10.0 },
                } } } } }
            }),
            query.body
        );
    }

    #[test]
    fn test_field_list_limits_source() {
        let query = EnvelopeQuery::build(
            &layer(None, vec![String::from("category")]),
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            10,
        );

        assert_eq!(json!(["gid", "location", "category"]), query.body["_source"]);
    }

    #[test]
    fn test_template_substitution() {
        let template = QueryTemplate::parse(
            r#"{"query": {"bool": {"filter": ["!BBOX!", {"term": {"category": "it"}}]}}}"#,
        )
        .unwrap();

        let query = EnvelopeQuery::build(
            &layer(Some(template), vec![]),
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            10,
        );

        let filter = &query.body["query"]["bool"]["filter"];
        assert_eq!(4.0, filter[0]["geo_bounding_box"]["location"]["top_right"]["lat"]);
        assert_eq!(1.0, filter[0]["geo_bounding_box"]["location"]["bottom_left"]["lon"]);
        assert_eq!(json!({"term": {"category": "it"}}), filter[1]);
        // Templates control their own size
        assert_eq!(None, query.body.get("size"));
    }

    #[test]
    fn test_template_validation() {
        assert!(QueryTemplate::parse("SELECT * FROM jobs").is_err());
        assert!(QueryTemplate::parse(r#"["!BBOX!"]"#).is_err());
        assert!(QueryTemplate::parse(r#"{"query": {"match_all": {}}}"#).is_err());
        assert!(QueryTemplate::parse(r#"{"query": "!BBOX!"}"#).is_ok());
    }
}
