//! Extract segment metadata and raw speed observations from bundles.
//!
//! The raw data CSVs can run to tens of millions of rows, so they are read in
//! fixed-size row chunks and each chunk is immediately joined against the
//! deduplicated segment table; only matched rows are kept. Chunk boundaries
//! have no effect on the result.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use log::{info, warn};
use serde::Deserialize;
use zip::ZipArchive;

use crate::archive::{self, RawDataBundle, TMC_MEMBER};
use crate::{DataOrigin, PipelineError, SpeedObservation, TmcSegment, TravelTimeUnit};

/// Number of rows read per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Everything read from a folder of bundles.
#[derive(Debug, Clone)]
pub struct RawDataSet {
    pub observations: Vec<SpeedObservation>,
    pub segments: Vec<TmcSegment>,
    /// Unit of the travel-time column; `None` when no bundles were found.
    pub travel_time_unit: Option<TravelTimeUnit>,
}

/// One row of `TMC_Identification.csv` as it appears on disk.
#[derive(Debug, Deserialize)]
struct TmcRow {
    #[serde(rename = "tmc")]
    tmc_code: String,
    #[serde(default)]
    road: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    intersection: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    county: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    start_latitude: Option<f64>,
    #[serde(default)]
    start_longitude: Option<f64>,
    #[serde(default)]
    end_latitude: Option<f64>,
    #[serde(default)]
    end_longitude: Option<f64>,
    #[serde(default)]
    miles: Option<f64>,
    #[serde(default)]
    road_order: Option<f64>,
    #[serde(default)]
    timezone_name: Option<String>,
    #[serde(default)]
    active_start_date: Option<String>,
    #[serde(default)]
    active_end_date: Option<String>,
}

impl TmcRow {
    fn into_segment(self, origin: DataOrigin) -> TmcSegment {
        TmcSegment {
            tmc_code: self.tmc_code,
            origin,
            road: self.road.unwrap_or_default(),
            direction: self.direction,
            intersection: self.intersection,
            state: self.state,
            county: self.county,
            zip: self.zip,
            start_latitude: self.start_latitude,
            start_longitude: self.start_longitude,
            end_latitude: self.end_latitude,
            end_longitude: self.end_longitude,
            miles: self.miles,
            road_order: self.road_order,
            timezone_name: self.timezone_name,
            active_start_date: self.active_start_date,
            active_end_date: self.active_end_date,
        }
    }
}

/// One row of a raw speed-data CSV as it appears on disk.
#[derive(Debug, Deserialize)]
struct SpeedRow {
    tmc_code: String,
    measurement_tstamp: String,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    average_speed: Option<f64>,
    #[serde(default)]
    reference_speed: Option<f64>,
    #[serde(default)]
    travel_time_seconds: Option<f64>,
    #[serde(default)]
    travel_time_minutes: Option<f64>,
}

/// Parse a RITIS timestamp.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, PipelineError> {
    // Exports normally use ISO dates; seconds are omitted in some older ones.
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M:%S"];
    for format in FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime);
        }
    }
    Err(PipelineError::BadTimestamp(value.to_string()))
}

/// Read a segment table, filter it by road name, and deduplicate it.
///
/// `road_filter` is a substring match on the road name; the empty string keeps
/// everything, including segments with no road name. When the table has
/// multiple rows for one TMC, the row with the latest `active_end_date` wins.
pub fn read_tmc_identification<R: Read>(
    reader: R,
    origin: DataOrigin,
    road_filter: &str,
) -> Result<Vec<TmcSegment>, PipelineError> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut segments = vec![];
    for row in rdr.deserialize() {
        let row: TmcRow = row?;
        let segment = row.into_segment(origin);
        if segment.road.contains(road_filter) {
            segments.push(segment);
        }
    }

    segments.sort_by(|a, b| {
        a.tmc_code
            .cmp(&b.tmc_code)
            .then_with(|| a.active_end_date.cmp(&b.active_end_date))
    });

    let mut deduped: Vec<TmcSegment> = vec![];
    for segment in segments {
        match deduped.last_mut() {
            Some(last) if last.tmc_code == segment.tmc_code => *last = segment,
            _ => deduped.push(segment),
        }
    }
    Ok(deduped)
}

/// Read a raw speed-data CSV in chunks, keeping only rows whose TMC is in the
/// segment table. Rows with no speed value are useless for every downstream
/// calculation and are dropped here.
pub fn read_speed_data<R: Read>(
    reader: R,
    origin: DataOrigin,
    segments: &[TmcSegment],
    chunk_size: usize,
) -> Result<(Vec<SpeedObservation>, TravelTimeUnit), PipelineError> {
    let chunk_size = chunk_size.max(1);
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let unit = if rdr
        .headers()?
        .iter()
        .any(|h| h == TravelTimeUnit::Minutes.column_name())
    {
        TravelTimeUnit::Minutes
    } else {
        TravelTimeUnit::Seconds
    };

    let roads_by_tmc: std::collections::HashMap<&str, &str> = segments
        .iter()
        .map(|s| (s.tmc_code.as_str(), s.road.as_str()))
        .collect();

    let mut observations = vec![];
    let mut chunk = Vec::with_capacity(chunk_size);
    for row in rdr.deserialize() {
        // A malformed row shouldn't stop a multi-million-row read.
        let row: SpeedRow = match row {
            Ok(v) => v,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        chunk.push(row);
        if chunk.len() == chunk_size {
            join_chunk(&mut chunk, origin, unit, &roads_by_tmc, &mut observations);
        }
    }
    join_chunk(&mut chunk, origin, unit, &roads_by_tmc, &mut observations);

    Ok((observations, unit))
}

/// Join one chunk of raw rows against the segment table, draining the chunk.
fn join_chunk(
    chunk: &mut Vec<SpeedRow>,
    origin: DataOrigin,
    unit: TravelTimeUnit,
    roads_by_tmc: &std::collections::HashMap<&str, &str>,
    observations: &mut Vec<SpeedObservation>,
) {
    for row in chunk.drain(..) {
        let Some(road) = roads_by_tmc.get(row.tmc_code.as_str()) else {
            continue;
        };
        let Some(speed) = row.speed else {
            continue;
        };
        let measurement_tstamp = match parse_timestamp(&row.measurement_tstamp) {
            Ok(v) => v,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        let travel_time = match unit {
            TravelTimeUnit::Seconds => row.travel_time_seconds,
            TravelTimeUnit::Minutes => row.travel_time_minutes,
        };
        observations.push(SpeedObservation {
            tmc_code: row.tmc_code,
            origin,
            road: road.to_string(),
            measurement_tstamp,
            speed,
            average_speed: row.average_speed,
            reference_speed: row.reference_speed,
            travel_time,
        });
    }
}

/// Read one bundle: its segment table, then its raw data.
pub fn read_bundle(
    bundle: &RawDataBundle,
    road_filter: &str,
    chunk_size: usize,
) -> Result<(Vec<SpeedObservation>, Vec<TmcSegment>, TravelTimeUnit), PipelineError> {
    let file = File::open(&bundle.zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    let segments = read_tmc_identification(archive.by_name(TMC_MEMBER)?, bundle.origin, road_filter)?;

    let (observations, unit) = read_speed_data(
        archive.by_name(&bundle.data_member)?,
        bundle.origin,
        &segments,
        chunk_size,
    )?;

    info!(
        "Read {} observations over {} segments from {:?}.",
        observations.len(),
        segments.len(),
        bundle.zip_path
    );
    Ok((observations, segments, unit))
}

/// Read every bundle in a folder and combine the results.
///
/// Observations are deduplicated by (origin, TMC, timestamp), first occurrence
/// wins.
pub fn read_batch(
    dir: &Path,
    road_filter: &str,
    chunk_size: usize,
) -> Result<RawDataSet, PipelineError> {
    let bundles = archive::discover(dir)?;
    if bundles.is_empty() {
        warn!("No RITIS bundles found in {dir:?}.");
    }

    let mut observations = vec![];
    let mut segments = vec![];
    let mut travel_time_unit: Option<TravelTimeUnit> = None;

    for bundle in &bundles {
        let (bundle_observations, bundle_segments, bundle_unit) =
            read_bundle(bundle, road_filter, chunk_size)?;
        match travel_time_unit {
            None => travel_time_unit = Some(bundle_unit),
            Some(unit) if unit != bundle_unit => {
                warn!(
                    "Bundle {:?} uses {} but earlier bundles use {}; travel times are not comparable across sources.",
                    bundle.zip_path,
                    bundle_unit.column_name(),
                    unit.column_name()
                );
            }
            Some(_) => (),
        }
        observations.extend(bundle_observations);
        segments.extend(bundle_segments);
    }

    let mut seen = HashSet::new();
    observations.retain(|obs| {
        seen.insert((
            obs.origin,
            obs.tmc_code.clone(),
            obs.measurement_tstamp,
        ))
    });

    Ok(RawDataSet {
        observations,
        segments,
        travel_time_unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TMC_CSV: &str = "\
tmc,road,direction,intersection,state,county,zip,start_latitude,start_longitude,end_latitude,end_longitude,miles,road_order,timezone_name,type,country,active_start_date,active_end_date
133+04098,I-95,NORTHBOUND,US 1,PA,PHILADELPHIA,19019,39.9,-75.1,40.0,-75.0,1.2,10,America/New_York,P1.11,USA,2021-01-01,2021-06-30
133+04098,I-95,NORTHBOUND,US 1,PA,PHILADELPHIA,19019,39.9,-75.1,40.0,-75.0,1.3,10,America/New_York,P1.11,USA,2021-07-01,2021-12-31
133+04099,US 30,EASTBOUND,,PA,CHESTER,,39.9,-75.6,39.9,-75.5,0.8,11,America/New_York,P1.11,USA,2021-01-01,2021-12-31
133+04100,,WESTBOUND,,PA,CHESTER,,39.8,-75.6,39.8,-75.5,0.5,12,America/New_York,P1.11,USA,2021-01-01,2021-12-31
";

    #[test]
    fn tmc_dedup_keeps_latest_active_end_date() {
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::NpmrdsMixed, "").unwrap();
        assert_eq!(segments.len(), 3);
        let dup = segments.iter().find(|s| s.tmc_code == "133+04098").unwrap();
        assert_eq!(dup.active_end_date.as_deref(), Some("2021-12-31"));
        assert_eq!(dup.miles, Some(1.3));
    }

    #[test]
    fn tmc_road_filter_is_substring_match() {
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::NpmrdsMixed, "95").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].road, "I-95");

        // Empty filter keeps everything, nameless roads included.
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::NpmrdsMixed, "").unwrap();
        assert!(segments.iter().any(|s| s.road.is_empty()));
    }

    #[test]
    fn speed_rows_join_against_segment_table() {
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::NpmrdsMixed, "").unwrap();
        let data = "\
tmc_code,measurement_tstamp,speed,average_speed,reference_speed,travel_time_seconds
133+04098,2021-03-02 06:00:00,52.1,54.0,60.0,82.9
133+04098,2021-03-02 06:15:00,,54.0,60.0,
999+99999,2021-03-02 06:00:00,41.0,44.0,50.0,70.2
133+04099,bogus,41.0,44.0,50.0,70.2
133+04099,2021-03-02 06:00:00,41.0,44.0,50.0,70.2
";
        let (observations, unit) =
            read_speed_data(data.as_bytes(), DataOrigin::NpmrdsMixed, &segments, 2).unwrap();

        assert_eq!(unit, TravelTimeUnit::Seconds);
        // Null speed, unknown TMC, and bad timestamp rows are all dropped.
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].road, "I-95");
        assert_eq!(observations[0].travel_time, Some(82.9));
    }

    #[test]
    fn travel_time_unit_detected_from_header() {
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::Inrix, "").unwrap();
        let data = "\
tmc_code,measurement_tstamp,speed,average_speed,reference_speed,travel_time_minutes
133+04098,2021-03-02 06:00:00,52.1,54.0,60.0,1.38
";
        let (observations, unit) =
            read_speed_data(data.as_bytes(), DataOrigin::Inrix, &segments, 100).unwrap();
        assert_eq!(unit, TravelTimeUnit::Minutes);
        assert_eq!(observations[0].travel_time, Some(1.38));
    }

    #[test]
    fn chunk_size_does_not_change_results() {
        let segments =
            read_tmc_identification(TMC_CSV.as_bytes(), DataOrigin::Inrix, "").unwrap();
        let data = "\
tmc_code,measurement_tstamp,speed,travel_time_seconds
133+04098,2021-03-02 06:00:00,52.1,82.9
133+04098,2021-03-02 06:15:00,50.0,86.0
133+04099,2021-03-02 06:00:00,41.0,70.2
133+04099,2021-03-02 06:15:00,42.0,68.5
133+04100,2021-03-02 06:00:00,33.0,54.0
";
        let (one_chunk, _) =
            read_speed_data(data.as_bytes(), DataOrigin::Inrix, &segments, 1000).unwrap();
        let (tiny_chunks, _) =
            read_speed_data(data.as_bytes(), DataOrigin::Inrix, &segments, 1).unwrap();
        assert_eq!(one_chunk.len(), 5);
        assert_eq!(one_chunk.len(), tiny_chunks.len());
        for (a, b) in one_chunk.iter().zip(&tiny_chunks) {
            assert_eq!(a.tmc_code, b.tmc_code);
            assert_eq!(a.measurement_tstamp, b.measurement_tstamp);
        }
    }

    #[test]
    fn timestamp_parsing_accepts_known_formats() {
        assert!(parse_timestamp("2021-03-02 06:00:00").is_ok());
        assert!(parse_timestamp("2021-03-02 06:00").is_ok());
        assert!(parse_timestamp("03/02/2021 06:00:00").is_ok());
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(PipelineError::BadTimestamp(_))
        ));
    }
}
