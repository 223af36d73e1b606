//! GeoJSON snapshot serialization.
//!
//! The document layout is fixed so that identical features always produce
//! identical bytes, which is what change detection in the publisher relies
//! on:
//!
//! - compact JSON followed by a single newline
//! - keys in declaration order, optional properties omitted when absent
//! - descriptive attributes after the fixed keys, sorted by key
//! - coordinates snapped to the writer precision
//! - no generation timestamp inside the document

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::WriteError;
use crate::geometry;
use crate::model::{ZoneFeature, ZoneGeometry};

/// Serialized snapshot bytes plus what the publisher records about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub feature_count: usize,
}

impl Snapshot {
    /// Hex-encoded SHA-256 of the document.
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[derive(Serialize)]
struct FeatureCollectionDoc<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<FeatureDoc<'a>>,
}

#[derive(Serialize)]
struct FeatureDoc<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    properties: PropertiesDoc<'a>,
    geometry: ZoneGeometry,
}

#[derive(Serialize)]
struct PropertiesDoc<'a> {
    zone: &'static str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_km: Option<f64>,
    #[serde(flatten)]
    attributes: BTreeMap<&'a str, &'a Value>,
}

/// Property keys the writer sets itself; attributes never override them.
const FIXED_KEYS: [&str; 4] = ["zone", "source", "name", "distance_km"];

/// Serializes zone features into the published FeatureCollection.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotWriter {
    precision: u32,
}

impl SnapshotWriter {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }

    /// Serialize features in the order given.
    pub fn write(&self, features: &[ZoneFeature]) -> Result<Snapshot, WriteError> {
        let document = FeatureCollectionDoc {
            kind: "FeatureCollection",
            features: features
                .iter()
                .map(|feature| FeatureDoc {
                    kind: "Feature",
                    id: &feature.id,
                    properties: PropertiesDoc {
                        zone: feature.zone.as_str(),
                        source: &feature.source,
                        name: feature.name.as_deref(),
                        distance_km: feature
                            .distance_km
                            .filter(|d| d.is_finite())
                            .map(|d| geometry::snap(d, self.precision)),
                        attributes: feature
                            .attributes
                            .iter()
                            .filter(|(key, _)| !FIXED_KEYS.contains(&key.as_str()))
                            .map(|(key, value)| (key.as_str(), value))
                            .collect(),
                    },
                    geometry: geometry::snap_geometry(&feature.geometry, self.precision),
                })
                .collect(),
        };

        let mut bytes = serde_json::to_vec(&document)?;
        bytes.push(b'\n');

        Ok(Snapshot {
            bytes,
            feature_count: features.len(),
        })
    }
}
