//! Write the processed datasets to disk.
//!
//! Summary and reliability tables go out two ways: as GeoJSON
//! FeatureCollections for mapping tools, and as flat CSV with the geometry
//! rendered into a `geom_wkt` column. The raw observation and segment tables
//! can also be exported for downstream analysis.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geojson::{Feature, FeatureCollection};
use log::info;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::geometry::ResolvedGeometry;
use crate::reliability::ReliabilityScore;
use crate::summarize::SpeedSummary;
use crate::{PipelineError, SpeedObservation, TmcSegment};

/// Property name carrying the geometry-source tag on every feature.
const GEOM_TYPE_PROPERTY: &str = "geom_final_type";

/// Write rows with resolved geometries as a GeoJSON FeatureCollection.
pub fn write_geojson<T: Serialize>(
    path: &Path,
    rows: &[(T, ResolvedGeometry)],
) -> Result<(), PipelineError> {
    let mut features = Vec::with_capacity(rows.len());
    for (row, resolved) in rows {
        let mut properties = match serde_json::to_value(row)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        properties.insert(
            GEOM_TYPE_PROPERTY.to_string(),
            resolved
                .source
                .map_or(Value::Null, |s| Value::String(s.as_str().to_string())),
        );

        features.push(Feature {
            bbox: None,
            geometry: resolved
                .geometry
                .as_ref()
                .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    info!("Wrote {} features to {path:?}.", rows.len());
    Ok(())
}

/// One flat CSV row of the summary table.
#[derive(Debug, Serialize)]
struct SummaryRecord<'a> {
    tmc_code: &'a str,
    data_origin: &'static str,
    summary_type: &'static str,
    count_obs: u64,
    speed_avg: Option<f64>,
    speed_01p: Option<f64>,
    speed_05p: Option<f64>,
    speed_15p: Option<f64>,
    speed_20p: Option<f64>,
    speed_50p: Option<f64>,
    speed_80p: Option<f64>,
    speed_85p: Option<f64>,
    speed_95p: Option<f64>,
    speed_99p: Option<f64>,
    ttime_avg: Option<f64>,
    ttime_01p: Option<f64>,
    ttime_05p: Option<f64>,
    ttime_15p: Option<f64>,
    ttime_20p: Option<f64>,
    ttime_50p: Option<f64>,
    ttime_80p: Option<f64>,
    ttime_85p: Option<f64>,
    ttime_95p: Option<f64>,
    ttime_99p: Option<f64>,
    geom_final_type: Option<&'static str>,
    geom_wkt: Option<&'a str>,
}

impl<'a> SummaryRecord<'a> {
    fn new(summary: &'a SpeedSummary, resolved: &'a ResolvedGeometry) -> Self {
        Self {
            tmc_code: &summary.tmc_code,
            data_origin: summary.origin.as_str(),
            summary_type: summary.summary_type.as_str(),
            count_obs: summary.count_obs,
            speed_avg: summary.speed_avg,
            speed_01p: summary.speed_01p,
            speed_05p: summary.speed_05p,
            speed_15p: summary.speed_15p,
            speed_20p: summary.speed_20p,
            speed_50p: summary.speed_50p,
            speed_80p: summary.speed_80p,
            speed_85p: summary.speed_85p,
            speed_95p: summary.speed_95p,
            speed_99p: summary.speed_99p,
            ttime_avg: summary.ttime_avg,
            ttime_01p: summary.ttime_01p,
            ttime_05p: summary.ttime_05p,
            ttime_15p: summary.ttime_15p,
            ttime_20p: summary.ttime_20p,
            ttime_50p: summary.ttime_50p,
            ttime_80p: summary.ttime_80p,
            ttime_85p: summary.ttime_85p,
            ttime_95p: summary.ttime_95p,
            ttime_99p: summary.ttime_99p,
            geom_final_type: resolved.source.map(|s| s.as_str()),
            geom_wkt: resolved.wkt.as_deref(),
        }
    }
}

/// One flat CSV row of the reliability table.
#[derive(Debug, Serialize)]
struct ReliabilityRecord<'a> {
    tmc_code: &'a str,
    data_origin: &'static str,
    reliability_type: &'static str,
    raw_data_rows: Option<u64>,
    summary_count: Option<u32>,
    reliability: Option<f64>,
    reliable: Option<bool>,
    geom_final_type: Option<&'static str>,
    geom_wkt: Option<&'a str>,
}

impl<'a> ReliabilityRecord<'a> {
    fn new(score: &'a ReliabilityScore, resolved: &'a ResolvedGeometry) -> Self {
        Self {
            tmc_code: &score.tmc_code,
            data_origin: score.origin.as_str(),
            reliability_type: score.kind.as_str(),
            raw_data_rows: score.raw_data_rows,
            summary_count: score.summary_count,
            reliability: score.reliability,
            reliable: score.reliable,
            geom_final_type: resolved.source.map(|s| s.as_str()),
            geom_wkt: resolved.wkt.as_deref(),
        }
    }
}

pub fn write_summary_csv(
    path: &Path,
    rows: &[(SpeedSummary, ResolvedGeometry)],
) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for (summary, resolved) in rows {
        wtr.serialize(SummaryRecord::new(summary, resolved))?;
    }
    wtr.flush()?;
    info!("Wrote {} summary rows to {path:?}.", rows.len());
    Ok(())
}

pub fn write_reliability_csv(
    path: &Path,
    rows: &[(ReliabilityScore, ResolvedGeometry)],
) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for (score, resolved) in rows {
        wtr.serialize(ReliabilityRecord::new(score, resolved))?;
    }
    wtr.flush()?;
    info!("Wrote {} reliability rows to {path:?}.", rows.len());
    Ok(())
}

/// Export the joined raw observations.
pub fn write_observations_csv(
    path: &Path,
    observations: &[SpeedObservation],
) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for observation in observations {
        wtr.serialize(observation)?;
    }
    wtr.flush()?;
    info!("Wrote {} raw observations to {path:?}.", observations.len());
    Ok(())
}

/// Export the deduplicated segment table.
pub fn write_segments_csv(path: &Path, segments: &[TmcSegment]) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for segment in segments {
        wtr.serialize(segment)?;
    }
    wtr.flush()?;
    info!("Wrote {} segments to {path:?}.", segments.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometrySource;
    use crate::reliability::ReliabilityKind;
    use crate::DataOrigin;
    use geo_types::{Geometry, LineString};
    use std::str::FromStr;
    use tempdir::TempDir;

    fn score_with_geometry() -> (ReliabilityScore, ResolvedGeometry) {
        let geometry = Geometry::LineString(LineString::from(vec![(-75.1, 39.9), (-75.0, 40.0)]));
        (
            ReliabilityScore {
                tmc_code: "133+04098".to_string(),
                origin: DataOrigin::NpmrdsTrucks,
                kind: ReliabilityKind::TruckTraffic,
                raw_data_rows: Some(120),
                summary_count: Some(5),
                reliability: Some(1.62),
                reliable: Some(false),
            },
            ResolvedGeometry {
                wkt: Some("LINESTRING(-75.1 39.9,-75 40)".to_string()),
                geometry: Some(geometry),
                source: Some(GeometrySource::SimplifiedTmcShape),
            },
        )
    }

    #[test]
    fn geojson_roundtrip_keeps_properties_and_geometry() {
        let dir = TempDir::new("export").unwrap();
        let path = dir.path().join("reliability.geojson");

        write_geojson(&path, &[score_with_geometry()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let collection = geojson::FeatureCollection::from_str(&text).unwrap();
        assert_eq!(collection.features.len(), 1);

        let feature = &collection.features[0];
        assert!(feature.geometry.is_some());
        let properties = feature.properties.as_ref().unwrap();
        assert_eq!(
            properties.get("tmc_code").unwrap().as_str(),
            Some("133+04098")
        );
        assert_eq!(
            properties.get("reliability_type").unwrap().as_str(),
            Some("Truck_Traffic")
        );
        assert_eq!(
            properties.get("geom_final_type").unwrap().as_str(),
            Some("simplified_tmc_shape")
        );
    }

    #[test]
    fn geojson_feature_without_geometry_has_null_tag() {
        let dir = TempDir::new("export").unwrap();
        let path = dir.path().join("reliability.geojson");

        let (score, _) = score_with_geometry();
        let no_geom = ResolvedGeometry {
            geometry: None,
            source: None,
            wkt: None,
        };
        write_geojson(&path, &[(score, no_geom)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let collection = geojson::FeatureCollection::from_str(&text).unwrap();
        let feature = &collection.features[0];
        assert!(feature.geometry.is_none());
        assert!(feature
            .properties
            .as_ref()
            .unwrap()
            .get("geom_final_type")
            .unwrap()
            .is_null());
    }

    #[test]
    fn reliability_csv_has_wkt_column() {
        let dir = TempDir::new("export").unwrap();
        let path = dir.path().join("reliability.csv");

        write_reliability_csv(&path, &[score_with_geometry()]).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "geom_wkt"));
        assert!(headers.iter().any(|h| h == "reliability"));

        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].iter().any(|f| f.starts_with("LINESTRING")));
    }
}
