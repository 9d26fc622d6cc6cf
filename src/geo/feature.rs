//! Rows to GeoJSON features.

use crate::geo::codec;
use crate::models::Row;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Default name of the geometry column.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

/// Columns searched, in order, for a feature identifier.
pub const ID_COLUMNS: [&str; 3] = ["id", "gid", "cvegeo"];

/// A GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    pub geometry: Option<JsonValue>,
    pub properties: Map<String, JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonValue>,
}

impl Feature {
    pub fn new(
        geometry: Option<JsonValue>,
        properties: Map<String, JsonValue>,
        id: Option<JsonValue>,
    ) -> Self {
        Self {
            kind: "Feature",
            geometry,
            properties,
            id,
        }
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection",
            features,
        }
    }

    /// A collection with no features.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::empty()
    }
}

/// Turns query rows into a `FeatureCollection`.
///
/// The geometry column is removed from each row and decoded; every other
/// column becomes a property, in result-set order. A missing or malformed
/// geometry yields `geometry: null` and keeps the properties.
#[derive(Debug, Clone)]
pub struct FeatureCollectionBuilder {
    geometry_column: String,
}

impl FeatureCollectionBuilder {
    pub fn new() -> Self {
        Self {
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
        }
    }

    pub fn with_geometry_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_column = column.into();
        self
    }

    pub fn build(&self, rows: Vec<Row>) -> FeatureCollection {
        FeatureCollection::new(rows.into_iter().map(|row| self.feature(row)).collect())
    }

    fn feature(&self, mut row: Row) -> Feature {
        let raw = row.take(&self.geometry_column);
        let geometry = codec::decode(raw.as_ref());
        let id = ID_COLUMNS
            .iter()
            .find_map(|column| row.get_non_null(column))
            .cloned();
        Feature::new(geometry, row.into_map(), id)
    }
}

impl Default for FeatureCollectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => Row::from(map),
            _ => panic!("row fixture must be an object"),
        }
    }

    #[test]
    fn test_empty_rows() {
        let collection = FeatureCollectionBuilder::new().build(Vec::new());
        assert_eq!(collection, FeatureCollection::empty());
        assert_eq!(
            serde_json::to_value(&collection).unwrap(),
            json!({"type": "FeatureCollection", "features": []})
        );
    }

    #[test]
    fn test_feature_shape() {
        let rows = vec![row(json!({
            "nom_asen": "Centro",
            "geom": r#"{"type":"Point","coordinates":[-93.1,16.7]}"#,
            "pobtot": 1200
        }))];
        let collection = FeatureCollectionBuilder::new().build(rows);
        let value = serde_json::to_value(&collection).unwrap();

        assert_eq!(
            value["features"][0],
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [-93.1, 16.7]},
                "properties": {"nom_asen": "Centro", "pobtot": 1200}
            })
        );
        let keys: Vec<_> = collection.features[0].properties.keys().collect();
        assert_eq!(keys, vec!["nom_asen", "pobtot"]);
    }

    #[test]
    fn test_missing_geometry_column_keeps_properties() {
        let rows = vec![row(json!({"id": 1, "nombre": "Zona A"}))];
        let collection = FeatureCollectionBuilder::new().build(rows);
        let feature = &collection.features[0];
        assert_eq!(feature.geometry, None);
        assert_eq!(feature.properties.len(), 2);
        assert_eq!(
            serde_json::to_value(feature).unwrap()["geometry"],
            JsonValue::Null
        );
    }

    #[test]
    fn test_malformed_geometry_blanks_only_geometry() {
        let rows = vec![row(json!({"id": 3, "geom": "{broken", "nombre": "x"}))];
        let feature = &FeatureCollectionBuilder::new().build(rows).features[0];
        assert_eq!(feature.geometry, None);
        assert_eq!(feature.properties.get("nombre"), Some(&json!("x")));
        assert!(!feature.properties.contains_key("geom"));
    }

    #[test]
    fn test_id_precedence() {
        let rows = vec![
            row(json!({"id": 5, "gid": 9})),
            row(json!({"id": null, "gid": 9, "cvegeo": "0710100010"})),
            row(json!({"cvegeo": "0710100010"})),
            row(json!({"nombre": "sin id"})),
        ];
        let features = FeatureCollectionBuilder::new().build(rows).features;
        assert_eq!(features[0].id, Some(json!(5)));
        assert_eq!(features[1].id, Some(json!(9)));
        assert_eq!(features[2].id, Some(json!("0710100010")));
        assert_eq!(features[3].id, None);
        assert!(serde_json::to_value(&features[3]).unwrap().get("id").is_none());
    }

    #[test]
    fn test_custom_geometry_column() {
        let rows = vec![row(json!({
            "wkb_geometry": r#"{"type":"Point","coordinates":[0,0]}"#,
            "geom": "kept as property"
        }))];
        let collection = FeatureCollectionBuilder::new()
            .with_geometry_column("wkb_geometry")
            .build(rows);
        let feature = &collection.features[0];
        assert!(feature.geometry.is_some());
        assert_eq!(
            feature.properties.get("geom"),
            Some(&json!("kept as property"))
        );
    }
}
