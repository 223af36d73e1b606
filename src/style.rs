//! Display styles for zone labels.
//!
//! The map viewer colours features by their `zone` property. Labels it does
//! not know get a grey style so they stay visible instead of disappearing.

use serde::Serialize;

use crate::model::ZoneLabel;

/// Fill and stroke of a zone on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoneStyle {
    pub label: &'static str,
    pub fill_color: &'static str,
    pub fill_opacity: f64,
    pub stroke_color: &'static str,
}

/// Style for labels outside [`ZoneLabel`].
pub const UNKNOWN_STYLE: ZoneStyle = ZoneStyle {
    label: "unknown",
    fill_color: "#9e9e9e",
    fill_opacity: 0.4,
    stroke_color: "#616161",
};

pub fn style(zone: ZoneLabel) -> ZoneStyle {
    match zone {
        ZoneLabel::Critical => ZoneStyle {
            label: "Critical",
            fill_color: "#d7191c",
            fill_opacity: 0.5,
            stroke_color: "#a50f15",
        },
        ZoneLabel::High => ZoneStyle {
            label: "High",
            fill_color: "#fdae61",
            fill_opacity: 0.4,
            stroke_color: "#e66101",
        },
        ZoneLabel::Moderate => ZoneStyle {
            label: "Moderate",
            fill_color: "#ffffbf",
            fill_opacity: 0.3,
            stroke_color: "#d8b365",
        },
    }
}

/// Style for a label read from a published document.
pub fn style_for_label(label: &str) -> ZoneStyle {
    ZoneLabel::parse(label).map(style).unwrap_or(UNKNOWN_STYLE)
}

/// Every style the viewer needs, in severity order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyleTable {
    pub zones: Vec<ZoneStyle>,
    pub unknown: ZoneStyle,
}

impl Default for StyleTable {
    fn default() -> Self {
        Self {
            zones: ZoneLabel::ALL.iter().copied().map(style).collect(),
            unknown: UNKNOWN_STYLE,
        }
    }
}
