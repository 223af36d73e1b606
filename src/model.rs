//! Data models for the buffer-zone pipeline.
//!
//! Two families of types live here:
//!
//! - **Upstream** types ([`RawRecord`], [`RawGeometry`]) that exist only for
//!   the duration of a run and mirror whatever the providers send.
//! - **Published** types ([`ZoneFeature`], [`ZoneGeometry`], [`ZoneLabel`])
//!   that end up in the snapshot consumed by the map viewer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity band of a buffer zone.
///
/// The set is closed: the map viewer styles features by exactly these
/// labels. Variant order is severity order (most severe first), which the
/// writer relies on for a stable feature ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ZoneLabel {
    /// Innermost band, closest to the contact line.
    Critical,
    High,
    /// Outermost band.
    Moderate,
}

impl ZoneLabel {
    /// Every label, most severe first.
    pub const ALL: [ZoneLabel; 3] = [ZoneLabel::Critical, ZoneLabel::High, ZoneLabel::Moderate];

    /// The label as it appears in `properties.zone`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneLabel::Critical => "Critical",
            ZoneLabel::High => "High",
            ZoneLabel::Moderate => "Moderate",
        }
    }

    /// Parse a label, ignoring case and surrounding whitespace.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        ZoneLabel::ALL
            .into_iter()
            .find(|zone| zone.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ZoneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WGS84 position.
///
/// Upstream data sometimes carries a third ordinate (elevation); only
/// longitude and latitude are kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = String;

    fn try_from(ordinates: Vec<f64>) -> Result<Self, Self::Error> {
        match ordinates.as_slice() {
            [lon, lat, ..] => Ok(Position::new(*lon, *lat)),
            _ => Err(format!(
                "position needs at least 2 ordinates, got {}",
                ordinates.len()
            )),
        }
    }
}

impl From<Position> for [f64; 2] {
    fn from(position: Position) -> Self {
        [position.lon, position.lat]
    }
}

/// A linear ring: closed sequence of positions.
pub type Ring = Vec<Position>;

/// Polygon rings: exterior first, then holes.
pub type PolygonRings = Vec<Ring>;

/// Geometry as decoded from an upstream provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum RawGeometry {
    Polygon {
        coordinates: PolygonRings,
    },
    MultiPolygon {
        coordinates: Vec<PolygonRings>,
    },
    GeometryCollection {
        geometries: Vec<RawGeometry>,
    },
    /// Points, lines and anything else that cannot describe an area.
    #[serde(other)]
    Unsupported,
}

/// Area geometry of a published zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum ZoneGeometry {
    Polygon(PolygonRings),
    MultiPolygon(Vec<PolygonRings>),
}

impl ZoneGeometry {
    /// Number of polygons in this geometry.
    pub fn polygon_count(&self) -> usize {
        match self {
            ZoneGeometry::Polygon(_) => 1,
            ZoneGeometry::MultiPolygon(polygons) => polygons.len(),
        }
    }
}

/// A single upstream data unit.
///
/// Lives only for the duration of a run; the classifier turns it into at
/// most one [`ZoneFeature`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Identifier of the source this record came from.
    pub source: String,

    /// Record identifier, unique within its source.
    pub id: String,

    /// Human-readable area name.
    pub name: Option<String>,

    /// Administrative status of the area (e.g. "Occupied").
    pub status: Option<String>,

    /// Distance from the contact line in kilometres.
    pub distance_km: Option<f64>,

    /// A zone label the provider already assigned.
    pub zone_hint: Option<String>,

    /// Any other properties; carried into the published feature.
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Geometry, if the provider sent one.
    pub geometry: Option<RawGeometry>,
}

impl RawRecord {
    /// A record with only an identity; everything else empty.
    pub fn new(source: &str, id: &str) -> Self {
        Self {
            source: source.to_string(),
            id: id.to_string(),
            name: None,
            status: None,
            distance_km: None,
            zone_hint: None,
            attributes: BTreeMap::new(),
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: RawGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_distance_km(mut self, distance_km: f64) -> Self {
        self.distance_km = Some(distance_km);
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_zone_hint(mut self, zone: &str) -> Self {
        self.zone_hint = Some(zone.to_string());
        self
    }
}

/// A classified buffer zone, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneFeature {
    pub id: String,
    pub source: String,
    pub zone: ZoneLabel,
    pub name: Option<String>,
    pub distance_km: Option<f64>,
    /// Descriptive upstream properties, written after the fixed keys.
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub geometry: ZoneGeometry,
}
