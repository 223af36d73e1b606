//! DeepStateMap payloads.
//!
//! The `history/last` endpoint returns the most recent map revision:
//!
//! ```json
//! { "id": 1712345678, "datetime": "...", "map": { "type": "FeatureCollection", "features": [...] } }
//! ```
//!
//! Feature names are `///`-separated; the second segment is the English
//! status of the area (e.g. `"Occupied"`, `"Occupied Crimea"`).
//!
//! # API Reference
//!
//! See: <https://deepstatemap.live>

use serde::Deserialize;

use super::geojson::UpstreamFeatureCollection;
use crate::error::FetchError;
use crate::model::RawRecord;

/// Latest map revision endpoint.
pub const DEEPSTATE_API_URL: &str = "https://deepstatemap.live/api/history/last";

/// Separator between the language segments of a feature name.
const NAME_SEPARATOR: &str = "///";

/// Response from the `history/last` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeepStateResponse {
    /// Revision identifier.
    #[serde(default)]
    pub id: Option<serde_json::Value>,

    /// Revision timestamp as sent by the API.
    #[serde(default)]
    pub datetime: Option<String>,

    /// The map itself. Error responses carry no map and fail to decode.
    pub map: UpstreamFeatureCollection,
}

/// Extract the status segment from a DeepStateMap feature name.
pub fn status_from_name(name: &str) -> Option<String> {
    name.split(NAME_SEPARATOR)
        .nth(1)
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(str::to_string)
}

/// Decode a `history/last` payload.
pub fn decode(source_id: &str, payload: &[u8]) -> Result<Vec<RawRecord>, FetchError> {
    let response: DeepStateResponse =
        serde_json::from_slice(payload).map_err(|error| FetchError::Malformed {
            source_id: source_id.to_string(),
            error,
        })?;

    let records = response
        .map
        .into_records(source_id)
        .into_iter()
        .map(|mut record| {
            if record.status.is_none() {
                record.status = record.name.as_deref().and_then(status_from_name);
            }
            record
        })
        .collect();

    Ok(records)
}
