//! Upstream data sources for the buffer-zone map.
//!
//! A source is configured as `ID=KIND:LOCATION`, for example
//! `deepstate=deepstate:https://deepstatemap.live/api/history/last` or
//! `borders=geojson:input/ukr_adm0.geojson`. HTTP locations are fetched with
//! retries; anything else is read from the local filesystem.
//!
//! # Formats
//!
//! - [`deepstate`]: DeepStateMap API payloads (a FeatureCollection under `map`)
//! - [`geojson`]: plain GeoJSON FeatureCollections

pub mod deepstate;
pub mod fetcher;
pub mod geojson;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FetchError};
use crate::model::RawRecord;

pub use fetcher::{FetchOutcome, SourceFetcher};

/// Payload format of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    DeepState,
    GeoJson,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::DeepState => "deepstate",
            SourceKind::GeoJson => "geojson",
        }
    }

    /// Decode a raw payload into records.
    pub fn decode(&self, source_id: &str, payload: &[u8]) -> Result<Vec<RawRecord>, FetchError> {
        match self {
            SourceKind::DeepState => deepstate::decode(source_id, payload),
            SourceKind::GeoJson => geojson::decode(source_id, payload),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "deepstate" => Ok(SourceKind::DeepState),
            "geojson" => Ok(SourceKind::GeoJson),
            other => Err(format!("unknown source kind '{other}' (expected deepstate or geojson)")),
        }
    }
}

/// Where a source payload is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Http(String),
    File(PathBuf),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Http(url) => f.write_str(url),
            SourceLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A configured upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Stable identifier; results are merged in identifier order.
    pub id: String,
    pub kind: SourceKind,
    pub location: SourceLocation,
}

impl SourceSpec {
    pub fn new(id: &str, kind: SourceKind, location: SourceLocation) -> Self {
        Self {
            id: id.to_string(),
            kind,
            location,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.id, self.kind.as_str(), self.location)
    }
}

impl FromStr for SourceSpec {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSource {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (id, rest) = spec
            .trim()
            .split_once('=')
            .ok_or_else(|| invalid("expected ID=KIND:LOCATION"))?;

        let id = id.trim();
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("id must be non-empty and use only [A-Za-z0-9_-]"));
        }

        let (kind, location) = rest
            .split_once(':')
            .ok_or_else(|| invalid("expected KIND:LOCATION after '='"))?;
        let kind = kind.parse::<SourceKind>().map_err(|reason| invalid(&reason))?;

        let location = location.trim();
        if location.is_empty() {
            return Err(invalid("location is empty"));
        }

        let location = if location.starts_with("http://") || location.starts_with("https://") {
            SourceLocation::Http(location.to_string())
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            SourceLocation::File(PathBuf::from(path))
        };

        Ok(SourceSpec::new(id, kind, location))
    }
}
