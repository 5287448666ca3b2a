use geo::Geometry;
use geojson::{feature, GeoJson};
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to parse GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GeoJSON must be a FeatureCollection")]
    NotFeatureCollection,
    #[error("feature {index} has no '{property}' property")]
    MissingProperty { property: String, index: usize },
    #[error("feature {index} has a non-numeric '{property}' value: {value}")]
    NotNumeric {
        property: String,
        index: usize,
        value: String,
    },
    #[error("prediction response is missing the 'updated_geojson' string")]
    MalformedEnvelope,
}

/// One grid square (or point) of a prediction surface.
#[derive(Debug, Clone)]
pub struct GridCell {
    pub id: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
}

/// A decoded GeoJSON FeatureCollection as returned by the prediction service.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    cells: Vec<GridCell>,
}

impl Surface {
    pub fn from_geojson_str(s: &str) -> Result<Self, DataError> {
        Self::from_geojson(GeoJson::from_str(s)?)
    }

    pub fn from_geojson(geojson: GeoJson) -> Result<Self, DataError> {
        Self::from_geojson_with_id(geojson, None)
    }

    /// Decodes a FeatureCollection, taking each cell id from the feature id
    /// or, failing that, from `id_property`.
    pub fn from_geojson_with_id(geojson: GeoJson, id_property: Option<&str>) -> Result<Self, DataError> {
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(DataError::NotFeatureCollection),
        };

        let mut cells = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let properties = feature.properties.unwrap_or_default();

            let id = match feature.id {
                Some(feature::Id::String(s)) => Some(s),
                Some(feature::Id::Number(n)) => Some(n.to_string()),
                None => id_property
                    .and_then(|name| properties.get(name))
                    .and_then(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    }),
            };

            // Unconvertible geometries keep their properties but cannot be drawn.
            let geometry = feature
                .geometry
                .and_then(|geom| Geometry::<f64>::try_from(geom.value).ok());

            cells.push(GridCell {
                id,
                geometry,
                properties,
            });
        }

        Ok(Surface { cells })
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Every cell's value for `property`, in cell order. Fails on the first
    /// cell where the property is absent, null or not a finite number.
    pub fn numeric_property(&self, property: &str) -> Result<Vec<f64>, DataError> {
        self.cells
            .iter()
            .enumerate()
            .map(|(index, cell)| match cell.properties.get(property) {
                None | Some(Value::Null) => Err(DataError::MissingProperty {
                    property: property.to_string(),
                    index,
                }),
                Some(value) => value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| DataError::NotNumeric {
                        property: property.to_string(),
                        index,
                        value: value.to_string(),
                    }),
            })
            .collect()
    }
}

/// Decodes a `/predict` response: a JSON object whose `updated_geojson`
/// field holds the GeoJSON document as a string.
pub fn decode_prediction_envelope(body: &str) -> Result<Surface, DataError> {
    let envelope: Value = serde_json::from_str(body)?;
    let inner = envelope
        .get("updated_geojson")
        .and_then(Value::as_str)
        .ok_or(DataError::MalformedEnvelope)?;
    Surface::from_geojson_str(inner)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_grid() {
        let body = pollution_grid("no2", [1.0, 2.0, 3.0, 4.0], [1, 2, 3, 4]);
        let surface = Surface::from_geojson_str(&body).unwrap();
        assert_eq!(surface.len(), 4);
        assert!(matches!(surface.cells()[0].geometry, Some(Geometry::Polygon(_))));
        assert_eq!(
            surface.numeric_property("no2 Prediction mean").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_id_from_property() {
        let body = pollution_grid("no2", [1.0; 4], [1; 4]);
        let geojson = GeoJson::from_str(&body).unwrap();
        let surface = Surface::from_geojson_with_id(geojson, Some("Grid ID")).unwrap();
        assert_eq!(surface.cells()[3].id.as_deref(), Some("g3"));
    }

    #[test]
    fn test_missing_property_is_reported() {
        let body = grid_geojson(&[json!({"a": 1.0}), json!({"b": 2.0})]);
        let surface = Surface::from_geojson_str(&body).unwrap();
        match surface.numeric_property("a") {
            Err(DataError::MissingProperty { property, index }) => {
                assert_eq!(property, "a");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_null_and_text_values_rejected() {
        let body = grid_geojson(&[json!({"a": null})]);
        let surface = Surface::from_geojson_str(&body).unwrap();
        assert!(matches!(
            surface.numeric_property("a"),
            Err(DataError::MissingProperty { .. })
        ));

        let body = grid_geojson(&[json!({"a": "high"})]);
        let surface = Surface::from_geojson_str(&body).unwrap();
        assert!(matches!(
            surface.numeric_property("a"),
            Err(DataError::NotNumeric { .. })
        ));
    }

    #[test]
    fn test_rejects_single_feature() {
        let body = json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
            "properties": {}
        })
        .to_string();
        assert!(matches!(
            Surface::from_geojson_str(&body),
            Err(DataError::NotFeatureCollection)
        ));
    }

    #[test]
    fn test_prediction_envelope() {
        let inner = pollution_grid("o3", [5.0, 6.0, 7.0, 8.0], [2, 2, 3, 3]);
        let body = json!({ "updated_geojson": inner }).to_string();
        let surface = decode_prediction_envelope(&body).unwrap();
        assert_eq!(surface.numeric_property("o3 AQI").unwrap(), vec![2.0, 2.0, 3.0, 3.0]);

        assert!(matches!(
            decode_prediction_envelope(r#"{"result": "ok"}"#),
            Err(DataError::MalformedEnvelope)
        ));
        assert!(matches!(
            decode_prediction_envelope(r#"{"updated_geojson": "{not json"}"#),
            Err(DataError::GeoJson(_))
        ));
    }
}
