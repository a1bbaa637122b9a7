//! The end-to-end batch run: read bundles, bucket, summarize, score, attach
//! geometries, and write whichever outputs were requested.

use std::collections::HashMap;
use std::path::PathBuf;

use log::info;

use crate::extract::{self, RawDataSet};
use crate::geometry::{self, ResolvedGeometry};
use crate::reliability::{self, ReliabilityScore};
use crate::summarize::{self, SpeedSummary};
use crate::timeslot::{self, LabeledObservation};
use crate::{export, PipelineError, TmcSegment, TravelTimeUnit};

/// What to run and where to write it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Folder scanned for RITIS zip bundles.
    pub data_dir: PathBuf,
    /// NPMRDS shapefile (`.shp`); without it every row gets a simplified link.
    pub shapefile: Option<PathBuf>,
    /// Substring filter on road names; the empty string keeps every segment.
    pub road_filter: String,
    /// Rows per chunk when reading the raw CSVs.
    pub chunk_size: usize,
    pub calc_mixed: bool,
    pub calc_trucks: bool,
    pub exports: ExportPaths,
}

/// Output files to write; `None` skips that export.
#[derive(Debug, Clone, Default)]
pub struct ExportPaths {
    pub raw_data_csv: Option<PathBuf>,
    pub tmc_data_csv: Option<PathBuf>,
    pub summary_geojson: Option<PathBuf>,
    pub summary_csv: Option<PathBuf>,
    pub reliability_geojson: Option<PathBuf>,
    pub reliability_csv: Option<PathBuf>,
}

/// Everything a run produces, whether or not it was exported.
#[derive(Debug)]
pub struct PipelineOutput {
    pub observations: Vec<LabeledObservation>,
    pub segments: Vec<TmcSegment>,
    pub travel_time_unit: Option<TravelTimeUnit>,
    pub summaries: Vec<(SpeedSummary, ResolvedGeometry)>,
    pub reliability: Vec<(ReliabilityScore, ResolvedGeometry)>,
}

pub fn run(config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    info!("Reading bundles from {:?}.", config.data_dir);
    let RawDataSet {
        observations,
        segments,
        travel_time_unit,
    } = extract::read_batch(&config.data_dir, &config.road_filter, config.chunk_size)?;
    info!(
        "Read {} observations over {} segments.",
        observations.len(),
        segments.len()
    );

    if let Some(path) = &config.exports.raw_data_csv {
        export::write_observations_csv(path, &observations)?;
    }
    if let Some(path) = &config.exports.tmc_data_csv {
        export::write_segments_csv(path, &segments)?;
    }

    let observations = timeslot::label_observations(observations);

    let summaries = summarize::summarize(&observations);
    info!("Computed {} summary rows.", summaries.len());

    let scores = reliability::score_all(
        &summaries,
        &observations,
        config.calc_mixed,
        config.calc_trucks,
    );
    info!("Scored {} segments for reliability.", scores.len());

    let shapes = match &config.shapefile {
        Some(path) => geometry::read_npmrds_shapefile(path)?,
        None => HashMap::new(),
    };

    let summaries = geometry::resolve_all(summaries, &segments, &shapes);
    if let Some(path) = &config.exports.summary_geojson {
        export::write_geojson(path, &summaries)?;
    }
    if let Some(path) = &config.exports.summary_csv {
        export::write_summary_csv(path, &summaries)?;
    }

    let reliability = geometry::resolve_all(scores, &segments, &shapes);
    if let Some(path) = &config.exports.reliability_geojson {
        export::write_geojson(path, &reliability)?;
    }
    if let Some(path) = &config.exports.reliability_csv {
        export::write_reliability_csv(path, &reliability)?;
    }

    Ok(PipelineOutput {
        observations,
        segments,
        travel_time_unit,
        summaries,
        reliability,
    })
}
