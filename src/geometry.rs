//! Resolve a geometry for every output row.
//!
//! The NPMRDS shapefile is the authoritative source for segment shapes. Not
//! every TMC in an export has one, so rows without a match fall back to a
//! straight line drawn between the endpoints recorded in the segment table.
//! Every row is tagged with which source its geometry came from.

use std::collections::HashMap;
use std::path::Path;

use geo_types::{Geometry, LineString};
use log::warn;
use serde::Serialize;
use wkt::ToWkt;

use crate::reliability::ReliabilityScore;
use crate::summarize::SpeedSummary;
use crate::{DataOrigin, PipelineError, TmcSegment};

/// Attribute field in the NPMRDS shapefile holding the TMC code.
const TMC_FIELD: &str = "Tmc";

/// Where a row's geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeometrySource {
    #[serde(rename = "original_tmc_shape")]
    OriginalTmcShape,
    #[serde(rename = "simplified_tmc_shape")]
    SimplifiedTmcShape,
}

impl GeometrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometrySource::OriginalTmcShape => "original_tmc_shape",
            GeometrySource::SimplifiedTmcShape => "simplified_tmc_shape",
        }
    }
}

/// A geometry resolved for one output row, with a WKT rendering for flat
/// (CSV) exports.
#[derive(Debug, Clone)]
pub struct ResolvedGeometry {
    pub geometry: Option<Geometry<f64>>,
    pub source: Option<GeometrySource>,
    pub wkt: Option<String>,
}

/// Read the NPMRDS shapefile into a map from TMC code to shape.
pub fn read_npmrds_shapefile(
    path: &Path,
) -> Result<HashMap<String, Geometry<f64>>, PipelineError> {
    let rows = shapefile::read(path)
        .map_err(|e| PipelineError::Shapefile(format!("failed reading {path:?}: {e}")))?;

    let mut shapes = HashMap::new();
    for (idx, (shape, record)) in rows.into_iter().enumerate() {
        let geometry = match shape {
            shapefile::Shape::Polyline(line) => {
                let mls: geo_types::MultiLineString<f64> = line.try_into().map_err(|e| {
                    PipelineError::Shapefile(format!("failed to convert polyline at row {idx}: {e}"))
                })?;
                Geometry::MultiLineString(mls)
            }
            shapefile::Shape::PolylineM(line) => {
                let mls: geo_types::MultiLineString<f64> = line.try_into().map_err(|e| {
                    PipelineError::Shapefile(format!("failed to convert polyline at row {idx}: {e}"))
                })?;
                Geometry::MultiLineString(mls)
            }
            other => {
                warn!(
                    "Unexpected shape type {} at row {idx} of {path:?}, skipped.",
                    other.shapetype()
                );
                continue;
            }
        };

        match record.get(TMC_FIELD) {
            Some(shapefile::dbase::FieldValue::Character(Some(code))) => {
                shapes.insert(code.trim().to_string(), geometry);
            }
            _ => {
                warn!("Row {idx} of {path:?} has no usable `{TMC_FIELD}` field, skipped.");
            }
        }
    }
    Ok(shapes)
}

/// Straight line between the endpoints recorded in the segment table.
pub fn simplified_link(segment: &TmcSegment) -> Option<LineString<f64>> {
    let (Some(start_lon), Some(start_lat), Some(end_lon), Some(end_lat)) = (
        segment.start_longitude,
        segment.start_latitude,
        segment.end_longitude,
        segment.end_latitude,
    ) else {
        return None;
    };
    Some(LineString::from(vec![
        (start_lon, start_lat),
        (end_lon, end_lat),
    ]))
}

/// Output row types that identify a segment, so geometries can be attached to
/// any of them.
pub trait SegmentRow {
    fn tmc_code(&self) -> &str;
    fn origin(&self) -> DataOrigin;
}

impl SegmentRow for SpeedSummary {
    fn tmc_code(&self) -> &str {
        &self.tmc_code
    }
    fn origin(&self) -> DataOrigin {
        self.origin
    }
}

impl SegmentRow for ReliabilityScore {
    fn tmc_code(&self) -> &str {
        &self.tmc_code
    }
    fn origin(&self) -> DataOrigin {
        self.origin
    }
}

/// Index segments by (data source, TMC) for fallback lookups.
fn segment_index(segments: &[TmcSegment]) -> HashMap<(DataOrigin, &str), &TmcSegment> {
    segments
        .iter()
        .map(|segment| ((segment.origin, segment.tmc_code.as_str()), segment))
        .collect()
}

fn resolve(
    tmc_code: &str,
    origin: DataOrigin,
    index: &HashMap<(DataOrigin, &str), &TmcSegment>,
    shapes: &HashMap<String, Geometry<f64>>,
) -> ResolvedGeometry {
    if let Some(geometry) = shapes.get(tmc_code) {
        return ResolvedGeometry {
            wkt: Some(geometry.wkt_string()),
            geometry: Some(geometry.clone()),
            source: Some(GeometrySource::OriginalTmcShape),
        };
    }

    if let Some(segment) = index.get(&(origin, tmc_code)) {
        if let Some(line) = simplified_link(segment) {
            let geometry = Geometry::LineString(line);
            return ResolvedGeometry {
                wkt: Some(geometry.wkt_string()),
                geometry: Some(geometry),
                source: Some(GeometrySource::SimplifiedTmcShape),
            };
        }
    }

    warn!("No geometry available for {origin}/{tmc_code}.");
    ResolvedGeometry {
        geometry: None,
        source: None,
        wkt: None,
    }
}

/// Attach a geometry to every row.
pub fn resolve_all<T: SegmentRow>(
    rows: Vec<T>,
    segments: &[TmcSegment],
    shapes: &HashMap<String, Geometry<f64>>,
) -> Vec<(T, ResolvedGeometry)> {
    let index = segment_index(segments);
    rows.into_iter()
        .map(|row| {
            let resolved = resolve(row.tmc_code(), row.origin(), &index, shapes);
            (row, resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::MultiLineString;

    fn segment(tmc_code: &str, with_coords: bool) -> TmcSegment {
        TmcSegment {
            tmc_code: tmc_code.to_string(),
            origin: DataOrigin::NpmrdsMixed,
            road: "I-95".to_string(),
            direction: None,
            intersection: None,
            state: None,
            county: None,
            zip: None,
            start_latitude: with_coords.then_some(39.9),
            start_longitude: with_coords.then_some(-75.1),
            end_latitude: with_coords.then_some(40.0),
            end_longitude: with_coords.then_some(-75.0),
            miles: Some(1.2),
            road_order: None,
            timezone_name: None,
            active_start_date: None,
            active_end_date: None,
        }
    }

    fn score(tmc_code: &str) -> ReliabilityScore {
        ReliabilityScore {
            tmc_code: tmc_code.to_string(),
            origin: DataOrigin::NpmrdsMixed,
            kind: crate::reliability::ReliabilityKind::MixedTraffic,
            raw_data_rows: None,
            summary_count: None,
            reliability: None,
            reliable: None,
        }
    }

    #[test]
    fn simplified_link_needs_all_four_coordinates() {
        assert!(simplified_link(&segment("A", true)).is_some());
        assert!(simplified_link(&segment("A", false)).is_none());

        let line = simplified_link(&segment("A", true)).unwrap();
        assert_eq!(line.0.len(), 2);
        assert_eq!(line.0[0].x, -75.1);
        assert_eq!(line.0[0].y, 39.9);
    }

    #[test]
    fn authoritative_shape_wins_over_simplified_link() {
        let mut shapes = HashMap::new();
        shapes.insert(
            "A".to_string(),
            Geometry::MultiLineString(MultiLineString::new(vec![LineString::from(vec![
                (-75.1, 39.9),
                (-75.05, 39.95),
                (-75.0, 40.0),
            ])])),
        );
        let segments = vec![segment("A", true), segment("B", true)];

        let resolved = resolve_all(vec![score("A"), score("B")], &segments, &shapes);

        let (_, a) = &resolved[0];
        assert_eq!(a.source, Some(GeometrySource::OriginalTmcShape));
        assert!(a.wkt.as_ref().unwrap().starts_with("MULTILINESTRING"));

        let (_, b) = &resolved[1];
        assert_eq!(b.source, Some(GeometrySource::SimplifiedTmcShape));
        assert!(b.wkt.as_ref().unwrap().starts_with("LINESTRING"));
    }

    #[test]
    fn rows_without_any_geometry_are_tagged_with_none() {
        let resolved = resolve_all(vec![score("C")], &[segment("C", false)], &HashMap::new());
        let (_, c) = &resolved[0];
        assert!(c.geometry.is_none());
        assert!(c.source.is_none());
        assert!(c.wkt.is_none());
    }
}
