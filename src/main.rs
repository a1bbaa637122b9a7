//! Batch-process a folder of RITIS zip bundles into FHWA travel-time summary
//! and reliability files.
//!
//! The data and log directories can be set in a `.env` file (`DATA_DIR`,
//! `LOG_DIR`); command-line arguments take precedence. All row-level defects
//! (bad timestamps, segments without geometry) are logged and skipped, so a
//! bad row never stops a run.

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use npmrds_reliability::extract::DEFAULT_CHUNK_SIZE;
use npmrds_reliability::pipeline::{self, ExportPaths, PipelineConfig};

const LOG: &str = "process.log";

#[derive(Parser)]
#[command(about = "Process RITIS probe-data exports into FHWA reliability files")]
struct Cli {
    /// Folder containing the RITIS zip bundles (defaults to DATA_DIR from .env).
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// NPMRDS shapefile used for segment geometries.
    #[arg(long)]
    shapefile: Option<PathBuf>,
    /// Keep only segments whose road name contains this string.
    #[arg(long, default_value = "")]
    road: String,
    /// Rows per chunk when reading the raw CSVs.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Folder the output files are written to.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Skip the mixed-traffic reliability computation.
    #[arg(long)]
    no_mixed: bool,
    /// Skip the truck reliability computation.
    #[arg(long)]
    no_trucks: bool,
    /// Also export the joined raw observations as CSV.
    #[arg(long)]
    export_raw: bool,
    /// Also export the deduplicated segment table as CSV.
    #[arg(long)]
    export_tmc: bool,
}

fn main() {
    // Load the .env file if there is one; it only provides defaults.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .or_else(|| env::var("DATA_DIR").ok().map(PathBuf::from))
        .expect("No data directory given; pass --data-dir or set DATA_DIR in .env.");

    let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| ".".to_string());

    // Set up logging, panic if it fails.
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Info,
            config,
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(format!("{log_dir}/{LOG}"))
                .expect("Could not open log file."),
        ),
    ])
    .expect("Could not configure logging.");

    let exports = ExportPaths {
        raw_data_csv: cli.export_raw.then(|| cli.output_dir.join("raw_speeds.csv")),
        tmc_data_csv: cli.export_tmc.then(|| cli.output_dir.join("tmc_data.csv")),
        summary_geojson: Some(cli.output_dir.join("fhwa_summaries.geojson")),
        summary_csv: Some(cli.output_dir.join("fhwa_summaries.csv")),
        reliability_geojson: Some(cli.output_dir.join("fhwa_reliability.geojson")),
        reliability_csv: Some(cli.output_dir.join("fhwa_reliability.csv")),
    };

    let config = PipelineConfig {
        data_dir,
        shapefile: cli.shapefile,
        road_filter: cli.road,
        chunk_size: cli.chunk_size,
        calc_mixed: !cli.no_mixed,
        calc_trucks: !cli.no_trucks,
        exports,
    };

    match pipeline::run(&config) {
        Ok(output) => {
            info!(
                "Done: {} summary rows, {} reliability rows.",
                output.summaries.len(),
                output.reliability.len()
            );
        }
        Err(e) => error!("{e}"),
    }
}
