//! Zone classification: raw records in, publishable zone features out.
//!
//! Classification is a pure function of a record's attributes. The first
//! rule that applies wins:
//!
//! 1. a `zone` the provider already assigned, when it names a known label
//! 2. `distance_km`, looked up in the [`ZoneBands`]
//! 3. a frontline status (e.g. "Occupied"), treated as distance zero
//!
//! Records that match no rule, or whose geometry does not survive
//! cleaning, are dropped rather than failing the run. Only when nothing
//! survives does the run fail, so that an empty map is never published.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{ConfigError, PipelineError};
use crate::geometry;
use crate::model::{RawRecord, ZoneFeature, ZoneLabel};

pub const DEFAULT_CRITICAL_KM: f64 = 9.0;
pub const DEFAULT_HIGH_KM: f64 = 40.0;
pub const DEFAULT_MODERATE_KM: f64 = 80.0;

/// Outer limits of the zone rings, in kilometres.
///
/// Each band is the half-open ring `(previous limit, limit]`; the Critical
/// band starts at zero inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneBands {
    pub critical_km: f64,
    pub high_km: f64,
    pub moderate_km: f64,
}

impl Default for ZoneBands {
    fn default() -> Self {
        Self {
            critical_km: DEFAULT_CRITICAL_KM,
            high_km: DEFAULT_HIGH_KM,
            moderate_km: DEFAULT_MODERATE_KM,
        }
    }
}

impl ZoneBands {
    /// Create validated bands.
    pub fn new(critical_km: f64, high_km: f64, moderate_km: f64) -> Result<Self, ConfigError> {
        let bands = Self {
            critical_km,
            high_km,
            moderate_km,
        };
        bands.validate()?;
        Ok(bands)
    }

    /// Limits must be finite, positive and strictly increasing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [self.critical_km, self.high_km, self.moderate_km];
        let valid = limits.iter().all(|limit| limit.is_finite())
            && self.critical_km > 0.0
            && self.critical_km < self.high_km
            && self.high_km < self.moderate_km;

        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidBands {
                critical: self.critical_km,
                high: self.high_km,
                moderate: self.moderate_km,
            })
        }
    }

    /// Outer limit of a zone.
    pub fn limit(&self, zone: ZoneLabel) -> f64 {
        match zone {
            ZoneLabel::Critical => self.critical_km,
            ZoneLabel::High => self.high_km,
            ZoneLabel::Moderate => self.moderate_km,
        }
    }

    /// Band containing `distance_km`, or `None` when the distance is
    /// negative, not a number or beyond the outermost band.
    pub fn classify(&self, distance_km: f64) -> Option<ZoneLabel> {
        if distance_km.is_nan() || distance_km < 0.0 {
            return None;
        }

        ZoneLabel::ALL
            .into_iter()
            .find(|zone| distance_km <= self.limit(*zone))
    }
}

/// Result of transforming a batch of records.
#[derive(Debug, Clone, Default)]
pub struct Transformed {
    /// Features ordered by zone severity, then source id, then record id.
    pub features: Vec<ZoneFeature>,

    /// Records no rule could classify.
    pub unclassified: usize,

    /// Classified records without a usable area geometry.
    pub invalid_geometry: usize,
}

/// Turns raw records into zone features.
#[derive(Debug, Clone)]
pub struct Classifier {
    bands: ZoneBands,
    frontline_statuses: BTreeSet<String>,
    precision: u32,
}

impl Classifier {
    pub fn new(bands: ZoneBands, frontline_statuses: BTreeSet<String>, precision: u32) -> Self {
        Self {
            bands,
            frontline_statuses,
            precision,
        }
    }

    /// Zone label for a record, from its attributes only.
    pub fn classify(&self, record: &RawRecord) -> Option<ZoneLabel> {
        if let Some(zone) = record.zone_hint.as_deref().and_then(ZoneLabel::parse) {
            return Some(zone);
        }

        if let Some(distance_km) = record.distance_km {
            return self.bands.classify(distance_km);
        }

        record
            .status
            .as_ref()
            .filter(|status| self.frontline_statuses.contains(status.as_str()))
            .and_then(|_| self.bands.classify(0.0))
    }

    /// Classify a batch, dropping what cannot be published.
    ///
    /// Fails with [`PipelineError::EmptyResult`] when no feature survives.
    pub fn transform(&self, records: Vec<RawRecord>) -> Result<Transformed, PipelineError> {
        let total = records.len();
        let mut transformed = Transformed::default();

        for record in records {
            let Some(zone) = self.classify(&record) else {
                debug!(source = %record.source, id = %record.id, "Dropping unclassifiable record");
                transformed.unclassified += 1;
                continue;
            };

            let geometry = record
                .geometry
                .as_ref()
                .and_then(|raw| geometry::clean(raw, self.precision));
            let Some(geometry) = geometry else {
                debug!(source = %record.source, id = %record.id, "Dropping record without valid area geometry");
                transformed.invalid_geometry += 1;
                continue;
            };

            transformed.features.push(ZoneFeature {
                id: record.id,
                source: record.source,
                zone,
                name: record.name,
                distance_km: record.distance_km,
                attributes: record.attributes,
                geometry,
            });
        }

        if transformed.features.is_empty() {
            return Err(PipelineError::EmptyResult { records: total });
        }

        transformed.features.sort_by(|a, b| {
            a.zone
                .cmp(&b.zone)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.id.cmp(&b.id))
        });

        info!(
            records = total,
            features = transformed.features.len(),
            unclassified = transformed.unclassified,
            invalid_geometry = transformed.invalid_geometry,
            "Records classified"
        );

        Ok(transformed)
    }
}
