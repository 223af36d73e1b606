//! Buffer Zones - refresh pipeline for a static web map of buffer zones.
//!
//! # Overview
//!
//! A scheduler invokes one refresh run at a time. Each run fetches the
//! configured upstream sources, classifies every record into a severity
//! band around the contact line, serializes the result as a deterministic
//! GeoJSON FeatureCollection and publishes it only when it differs from the
//! snapshot already published.
//!
//! # Guarantees
//!
//! - The published snapshot is replaced atomically; readers never see a
//!   truncated document.
//! - A failed run leaves the published snapshot byte for byte as it was.
//! - Identical inputs produce identical bytes, so an unchanged world
//!   produces no new publication.
//!
//! # Modules
//!
//! - [`data_sources`]: Fetching and decoding upstream providers
//! - [`classify`]: Zone bands and record classification
//! - [`geometry`]: Polygon cleaning and coordinate snapping
//! - [`writer`]: Deterministic snapshot serialization
//! - [`publisher`]: Change detection and atomic publication
//! - [`storage`]: SQLite publication log
//! - [`pipeline`]: Run orchestration and the run lock
//! - [`style`]: Display styles per zone label
//! - [`api`]: HTTP handlers serving the published data
//! - [`cli`]: Command line configuration

pub mod api;
pub mod classify;
pub mod cli;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod publisher;
pub mod storage;
pub mod style;
pub mod writer;
