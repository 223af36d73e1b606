//! Plain GeoJSON FeatureCollection sources.
//!
//! Recognised properties:
//!
//! - `id` (when the feature has no top-level `id`)
//! - `name`, `status`
//! - `distance_km`, or `distance_m` converted to kilometres
//! - `zone`: a label the provider already assigned
//!
//! All other properties are kept as record attributes.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::model::{RawGeometry, RawRecord};

/// Properties consumed into dedicated record fields.
const KNOWN_PROPERTIES: [&str; 6] = ["id", "name", "status", "distance_km", "distance_m", "zone"];

/// The only top-level GeoJSON type a source may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CollectionType {
    FeatureCollection,
}

/// A GeoJSON FeatureCollection as sent by providers.
///
/// Both `type` and `features` are required: an error object, a bare array
/// or a single geometry is malformed, not an empty collection.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFeatureCollection {
    #[serde(rename = "type")]
    pub kind: CollectionType,
    pub features: Vec<UpstreamFeature>,
}

/// A single GeoJSON feature as sent by providers.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFeature {
    #[serde(default)]
    pub id: Option<Value>,

    #[serde(default)]
    pub properties: Option<Map<String, Value>>,

    #[serde(default)]
    pub geometry: Option<RawGeometry>,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_property(properties: &Map<String, Value>, key: &str) -> Option<String> {
    properties
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn distance_km(properties: &Map<String, Value>) -> Option<f64> {
    properties
        .get("distance_km")
        .and_then(Value::as_f64)
        .or_else(|| {
            properties
                .get("distance_m")
                .and_then(Value::as_f64)
                .map(|metres| metres / 1000.0)
        })
}

impl UpstreamFeature {
    /// Convert into a record; `index` names features that carry no id.
    pub fn into_record(self, source_id: &str, index: usize) -> RawRecord {
        let properties = self.properties.unwrap_or_default();

        let id = self
            .id
            .as_ref()
            .and_then(id_string)
            .or_else(|| properties.get("id").and_then(id_string))
            .unwrap_or_else(|| format!("{source_id}:{index}"));

        let attributes = properties
            .iter()
            .filter(|(key, _)| !KNOWN_PROPERTIES.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        RawRecord {
            source: source_id.to_string(),
            id,
            name: string_property(&properties, "name"),
            status: string_property(&properties, "status"),
            distance_km: distance_km(&properties),
            zone_hint: string_property(&properties, "zone"),
            attributes,
            geometry: self.geometry,
        }
    }
}

impl UpstreamFeatureCollection {
    pub fn into_records(self, source_id: &str) -> Vec<RawRecord> {
        self.features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| feature.into_record(source_id, index))
            .collect()
    }
}

/// Decode a GeoJSON FeatureCollection payload.
pub fn decode(source_id: &str, payload: &[u8]) -> Result<Vec<RawRecord>, FetchError> {
    let collection: UpstreamFeatureCollection =
        serde_json::from_slice(payload).map_err(|error| FetchError::Malformed {
            source_id: source_id.to_string(),
            error,
        })?;

    Ok(collection.into_records(source_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": 17,
                "properties": {"name": "Kupiansk", "distance_m": 2500, "oblast": "Kharkiv"},
                "geometry": {"type": "Polygon", "coordinates": [[[37.6,49.7],[37.7,49.7],[37.7,49.8],[37.6,49.7]]]}
            },
            {
                "type": "Feature",
                "properties": {"id": "B", "zone": "High", "distance_km": 12.5},
                "geometry": null
            },
            {
                "type": "Feature",
                "properties": null,
                "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}
            }
        ]
    }"#;

    #[test]
    fn test_decode_feature_collection() {
        let records = decode("borders", SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.source, "borders");
        assert_eq!(first.id, "17");
        assert_eq!(first.name.as_deref(), Some("Kupiansk"));
        assert_eq!(first.distance_km, Some(2.5));
        assert_eq!(first.attributes.get("oblast"), Some(&Value::from("Kharkiv")));
        assert!(!first.attributes.contains_key("name"));
        assert!(matches!(first.geometry, Some(RawGeometry::Polygon { .. })));

        let second = &records[1];
        assert_eq!(second.id, "B");
        assert_eq!(second.zone_hint.as_deref(), Some("High"));
        assert_eq!(second.distance_km, Some(12.5));
        assert!(second.geometry.is_none());

        let third = &records[2];
        assert_eq!(third.id, "borders:2");
        assert_eq!(third.geometry, Some(RawGeometry::Unsupported));
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode("borders", b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
        assert_eq!(err.source_id(), Some("borders"));
    }

    #[test]
    fn test_decode_rejects_non_collections() {
        for payload in [
            r#"{"error":"rate limited"}"#,
            "[]",
            r#"{"type":"Point","coordinates":[30.0,50.0]}"#,
            r#"{"type":"FeatureCollection"}"#,
            r#"{"features":[]}"#,
        ] {
            let err = decode("borders", payload.as_bytes()).unwrap_err();
            assert!(
                matches!(err, FetchError::Malformed { .. }),
                "{payload} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_empty_collection() {
        let records = decode("borders", br#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        assert!(records.is_empty());
    }
}
