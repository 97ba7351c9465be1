use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON-style feature describing one cell outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

fn feature_kind() -> String {
    "Feature".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

impl Feature {
    /// Outer ring of a `Polygon` geometry, or of the first polygon of a
    /// `MultiPolygon`.
    pub fn outer_ring(&self) -> Option<Vec<(f64, f64)>> {
        let geometry = self.geometry.as_ref()?;
        let ring = match geometry.kind.as_str() {
            "Polygon" => geometry.coordinates.get(0)?,
            "MultiPolygon" => geometry.coordinates.get(0)?.get(0)?,
            _ => return None,
        };
        ring.as_array()?
            .iter()
            .map(|point| Some((point.get(0)?.as_f64()?, point.get(1)?.as_f64()?)))
            .collect()
    }

    /// `(min_x, min_y, max_x, max_y)` of the outer ring.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let ring = self.outer_ring()?;
        let (first, rest) = ring.split_first()?;
        Some(rest.iter().fold(
            (first.0, first.1, first.0, first.1),
            |(min_x, min_y, max_x, max_y), &(x, y)| (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)),
        ))
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}
