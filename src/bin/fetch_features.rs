//! Download a complete ArcGIS feature-server layer to a GeoJSON file,
//! paging past the server's per-request record cap.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use npmrds_reliability::feature_server::FeatureServerClient;

#[derive(Parser)]
#[command(about = "Download all features from an ArcGIS feature-server layer")]
struct Cli {
    /// Layer URL, e.g. https://services.arcgis.com/…/USA_Counties/FeatureServer/0/
    url: String,
    /// Columns to request (the object-id column is always included).
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,
    /// Output GeoJSON path.
    #[arg(long, default_value = "features.geojson")]
    output: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    TermLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new().set_time_format_rfc3339().build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("Could not configure logging.");

    let client = FeatureServerClient::new(&cli.url);
    let collection = match client.download(cli.columns.as_deref()) {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let file = match File::create(&cli.output) {
        Ok(v) => v,
        Err(e) => {
            error!("Unable to create {:?}: {e}", cli.output);
            return;
        }
    };
    let mut writer = BufWriter::new(file);
    if let Err(e) = serde_json::to_writer(&mut writer, &collection) {
        error!("Unable to write {:?}: {e}", cli.output);
        return;
    }
    if let Err(e) = writer.flush() {
        error!("Unable to write {:?}: {e}", cli.output);
        return;
    }

    info!(
        "Wrote {} features to {:?}.",
        collection.features.len(),
        cli.output
    );
}
