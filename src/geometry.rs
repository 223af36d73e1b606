//! Geometry cleaning applied between decoding and classification.
//!
//! Cleaning is deterministic and idempotent: `clean(clean(g)) == clean(g)`.
//! It snaps every ordinate to a fixed number of decimals, drops consecutive
//! duplicate positions, closes open rings, orients rings by the GeoJSON
//! right-hand rule (exterior counter-clockwise, holes clockwise) and rejects
//! anything that cannot describe a WGS84 area.

use crate::model::{PolygonRings, Position, RawGeometry, Ring, ZoneGeometry};

/// Default number of decimals kept for coordinates (about 0.1 m).
pub const DEFAULT_PRECISION: u32 = 6;

/// Minimum positions in a closed ring (a triangle plus the closing point).
const MIN_RING_POSITIONS: usize = 4;

/// Round a value to `precision` decimals.
pub fn snap(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let snapped = (value * factor).round() / factor;
    // Avoid emitting "-0.0"
    if snapped == 0.0 { 0.0 } else { snapped }
}

fn snap_position(position: Position, precision: u32) -> Position {
    Position::new(snap(position.lon, precision), snap(position.lat, precision))
}

fn in_wgs84_bounds(position: &Position) -> bool {
    position.lon.is_finite()
        && position.lat.is_finite()
        && position.lon.abs() <= 180.0
        && position.lat.abs() <= 90.0
}

/// Twice the signed area of a closed ring (positive when counter-clockwise).
fn signed_area2(ring: &[Position]) -> f64 {
    ring.windows(2)
        .map(|pair| pair[0].lon * pair[1].lat - pair[1].lon * pair[0].lat)
        .sum()
}

/// Clean a single ring, orienting it counter-clockwise when `exterior`.
///
/// Returns `None` when fewer than four positions remain or the ring
/// encloses no area.
fn clean_ring(ring: &[Position], precision: u32, exterior: bool) -> Option<Ring> {
    let mut cleaned: Ring = Vec::with_capacity(ring.len() + 1);
    for position in ring {
        let snapped = snap_position(*position, precision);
        if cleaned.last() != Some(&snapped) {
            cleaned.push(snapped);
        }
    }

    if let (Some(first), Some(last)) = (cleaned.first().copied(), cleaned.last().copied()) {
        if first != last {
            cleaned.push(first);
        }
    }

    if cleaned.len() < MIN_RING_POSITIONS {
        return None;
    }

    let area = signed_area2(&cleaned);
    if area == 0.0 {
        return None;
    }
    if (area > 0.0) != exterior {
        cleaned.reverse();
    }

    Some(cleaned)
}

/// Clean polygon rings. Any out-of-bounds position invalidates the polygon.
fn clean_polygon(rings: &[Ring], precision: u32) -> Option<PolygonRings> {
    if !rings.iter().flatten().all(in_wgs84_bounds) {
        return None;
    }

    let (exterior, holes) = rings.split_first()?;
    let mut cleaned = vec![clean_ring(exterior, precision, true)?];
    cleaned.extend(
        holes
            .iter()
            .filter_map(|hole| clean_ring(hole, precision, false)),
    );

    Some(cleaned)
}

fn collect_polygons<'a>(geometry: &'a RawGeometry, out: &mut Vec<&'a PolygonRings>) {
    match geometry {
        RawGeometry::Polygon { coordinates } => out.push(coordinates),
        RawGeometry::MultiPolygon { coordinates } => out.extend(coordinates.iter()),
        RawGeometry::GeometryCollection { geometries } => {
            for member in geometries {
                collect_polygons(member, out);
            }
        }
        RawGeometry::Unsupported => {}
    }
}

/// Clean an upstream geometry into a publishable area geometry.
///
/// Polygons stay polygons and multipolygons stay multipolygons; the
/// polygonal members of a geometry collection are merged into a
/// multipolygon. Returns `None` when nothing valid remains.
pub fn clean(geometry: &RawGeometry, precision: u32) -> Option<ZoneGeometry> {
    match geometry {
        RawGeometry::Polygon { coordinates } => {
            clean_polygon(coordinates, precision).map(ZoneGeometry::Polygon)
        }
        RawGeometry::MultiPolygon { .. } | RawGeometry::GeometryCollection { .. } => {
            let mut polygons = Vec::new();
            collect_polygons(geometry, &mut polygons);
            let cleaned: Vec<PolygonRings> = polygons
                .into_iter()
                .filter_map(|rings| clean_polygon(rings, precision))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(ZoneGeometry::MultiPolygon(cleaned))
            }
        }
        RawGeometry::Unsupported => None,
    }
}

/// Clean an already published geometry again.
pub fn reclean(geometry: &ZoneGeometry, precision: u32) -> Option<ZoneGeometry> {
    match geometry {
        ZoneGeometry::Polygon(rings) => clean_polygon(rings, precision).map(ZoneGeometry::Polygon),
        ZoneGeometry::MultiPolygon(polygons) => {
            let cleaned: Vec<PolygonRings> = polygons
                .iter()
                .filter_map(|rings| clean_polygon(rings, precision))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(ZoneGeometry::MultiPolygon(cleaned))
            }
        }
    }
}

/// Snap every ordinate of a geometry without any other change.
pub fn snap_geometry(geometry: &ZoneGeometry, precision: u32) -> ZoneGeometry {
    let snap_rings = |rings: &PolygonRings| -> PolygonRings {
        rings
            .iter()
            .map(|ring| {
                ring.iter()
                    .map(|position| snap_position(*position, precision))
                    .collect()
            })
            .collect()
    };

    match geometry {
        ZoneGeometry::Polygon(rings) => ZoneGeometry::Polygon(snap_rings(rings)),
        ZoneGeometry::MultiPolygon(polygons) => {
            ZoneGeometry::MultiPolygon(polygons.iter().map(snap_rings).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(points: &[(f64, f64)]) -> Ring {
        points
            .iter()
            .map(|&(lon, lat)| Position::new(lon, lat))
            .collect()
    }

    fn square() -> RawGeometry {
        RawGeometry::Polygon {
            coordinates: vec![ring(&[
                (30.0, 50.0),
                (31.0, 50.0),
                (31.0, 51.0),
                (30.0, 51.0),
                (30.0, 50.0),
            ])],
        }
    }

    #[test]
    fn test_snap() {
        assert_eq!(snap(30.123_456_789, 6), 30.123_457);
        assert_eq!(snap(-0.000_000_1, 6), 0.0);
        assert_eq!(snap(37.5, 0), 38.0);
    }

    #[test]
    fn test_clean_keeps_valid_polygon() {
        let cleaned = clean(&square(), DEFAULT_PRECISION).unwrap();
        match cleaned {
            ZoneGeometry::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert_eq!(rings[0].len(), 5);
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_closes_open_ring_and_drops_duplicates() {
        let geometry = RawGeometry::Polygon {
            coordinates: vec![ring(&[
                (30.0, 50.0),
                (31.0, 50.0),
                (31.000_000_01, 50.0),
                (31.0, 51.0),
            ])],
        };

        let ZoneGeometry::Polygon(rings) = clean(&geometry, 6).unwrap() else {
            panic!("expected polygon");
        };
        assert_eq!(
            rings[0],
            ring(&[(30.0, 50.0), (31.0, 50.0), (31.0, 51.0), (30.0, 50.0)])
        );
    }

    #[test]
    fn test_clean_orients_rings() {
        // Clockwise exterior with a counter-clockwise hole
        let geometry = RawGeometry::Polygon {
            coordinates: vec![
                ring(&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0), (4.0, 0.0), (0.0, 0.0)]),
                ring(&[(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0), (1.0, 1.0)]),
            ],
        };

        let ZoneGeometry::Polygon(rings) = clean(&geometry, 6).unwrap() else {
            panic!("expected polygon");
        };
        assert!(signed_area2(&rings[0]) > 0.0);
        assert!(signed_area2(&rings[1]) < 0.0);
    }

    #[test]
    fn test_clean_rejects_out_of_bounds() {
        let geometry = RawGeometry::Polygon {
            coordinates: vec![ring(&[
                (190.0, 50.0),
                (191.0, 50.0),
                (191.0, 51.0),
                (190.0, 50.0),
            ])],
        };
        assert!(clean(&geometry, 6).is_none());

        let nan = RawGeometry::Polygon {
            coordinates: vec![ring(&[(f64::NAN, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)])],
        };
        assert!(clean(&nan, 6).is_none());
    }

    #[test]
    fn test_clean_rejects_degenerate_rings() {
        let collapsed = RawGeometry::Polygon {
            coordinates: vec![ring(&[(30.0, 50.0), (30.0, 50.000_000_1), (30.0, 50.0)])],
        };
        assert!(clean(&collapsed, 6).is_none());

        let collinear = RawGeometry::Polygon {
            coordinates: vec![ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)])],
        };
        assert!(clean(&collinear, 6).is_none());
    }

    #[test]
    fn test_clean_collection_merges_polygons() {
        let geometry = RawGeometry::GeometryCollection {
            geometries: vec![square(), RawGeometry::Unsupported, square()],
        };

        let cleaned = clean(&geometry, 6).unwrap();
        assert!(matches!(cleaned, ZoneGeometry::MultiPolygon(_)));
        assert_eq!(cleaned.polygon_count(), 2);
    }

    #[test]
    fn test_clean_unsupported() {
        assert!(clean(&RawGeometry::Unsupported, 6).is_none());
        let empty = RawGeometry::GeometryCollection { geometries: vec![] };
        assert!(clean(&empty, 6).is_none());
    }

    #[test]
    fn test_clean_is_idempotent() {
        let geometry = RawGeometry::MultiPolygon {
            coordinates: vec![
                vec![ring(&[
                    (30.123_456_78, 50.987_654_32),
                    (30.0, 50.0),
                    (31.000_000_4, 50.0),
                    (31.000_000_3, 50.0),
                    (31.5, 51.333_333_33),
                ])],
                vec![ring(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (0.0, 0.0)])],
            ],
        };

        for precision in [0, 3, 6, 9] {
            if let Some(once) = clean(&geometry, precision) {
                let twice = reclean(&once, precision).unwrap();
                assert_eq!(once, twice, "precision {precision}");
            }
        }
    }
}
