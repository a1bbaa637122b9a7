//! Discover and classify RITIS export bundles on disk.
//!
//! An export from the RITIS massive data downloader is a zip containing a
//! `Contents.txt` manifest, a `TMC_Identification.csv` segment table, and one
//! raw speed-data CSV. The first manifest line describes the data source and
//! is what [classifies](crate::DataOrigin::from_manifest_line) the bundle.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{info, warn};
use zip::ZipArchive;

use crate::{DataOrigin, PipelineError};

/// Manifest member every qualifying bundle carries.
pub const MANIFEST_MEMBER: &str = "Contents.txt";
/// Segment-metadata member every qualifying bundle carries.
pub const TMC_MEMBER: &str = "TMC_Identification.csv";

/// A classified export bundle, located on disk.
#[derive(Debug, Clone)]
pub struct RawDataBundle {
    pub origin: DataOrigin,
    pub zip_path: PathBuf,
    /// Name of the raw speed-data CSV inside the zip.
    pub data_member: String,
}

/// Scan a directory (non-recursive) for RITIS bundles.
///
/// Zips without a manifest are not RITIS exports and are skipped silently;
/// bundles that fail to classify are skipped with a warning. When two zips
/// claim the same data source, the later one (by filename order) wins.
pub fn discover(dir: &Path) -> Result<Vec<RawDataBundle>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::BadPath(dir.to_path_buf()));
    }

    let mut zips = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
            zips.push(path);
        }
    }
    zips.sort();

    let mut by_origin: BTreeMap<DataOrigin, RawDataBundle> = BTreeMap::new();
    for path in zips {
        match classify_bundle(&path) {
            Ok(Some(bundle)) => {
                info!(
                    "Found {} data in {:?} ({}).",
                    bundle.origin, bundle.zip_path, bundle.data_member
                );
                by_origin.insert(bundle.origin, bundle);
            }
            Ok(None) => (),
            Err(e) => {
                warn!("Skipping {path:?}: {e}.");
                continue;
            }
        }
    }
    Ok(by_origin.into_values().collect())
}

/// Open one zip and determine whether it is a RITIS bundle, and of which source.
fn classify_bundle(path: &Path) -> Result<Option<RawDataBundle>, PipelineError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    if !names.iter().any(|name| name == MANIFEST_MEMBER) {
        return Ok(None);
    }

    let mut first_line = String::new();
    BufReader::new(archive.by_name(MANIFEST_MEMBER)?).read_line(&mut first_line)?;

    let origin = DataOrigin::from_manifest_line(&first_line)
        .ok_or_else(|| PipelineError::UnknownDataSource(first_line.trim().to_string()))?;

    // The raw data member is whichever CSV is not the manifest or segment table.
    let data_member = names
        .iter()
        .find(|name| *name != MANIFEST_MEMBER && *name != TMC_MEMBER)
        .cloned()
        .ok_or_else(|| PipelineError::MissingDataMember(path.to_path_buf()))?;

    Ok(Some(RawDataBundle {
        origin,
        zip_path: path.to_path_buf(),
        data_member,
    }))
}
