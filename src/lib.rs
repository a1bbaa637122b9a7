//! Process INRIX/NPMRDS probe-data exports from RITIS into FHWA-standard
//! travel-time summaries and reliability scores per TMC segment.
//!
//! See <https://www.fhwa.dot.gov/tpm/guidance/hif18040.pdf> for the formal
//! definitions of the reliability measures.

use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod archive;
pub mod export;
pub mod extract;
pub mod feature_server;
pub mod geometry;
pub mod pipeline;
pub mod reliability;
pub mod summarize;
pub mod timeslot;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("problem with file or directory path `{0}`")]
    BadPath(PathBuf),
    #[error("unable to open file")]
    CannotOpenFile(#[from] io::Error),
    #[error("unable to read zip archive")]
    Zip(#[from] zip::result::ZipError),
    #[error("error reading CSV data")]
    Csv(#[from] csv::Error),
    #[error("no raw data member in bundle `{0}`")]
    MissingDataMember(PathBuf),
    #[error("no matching data source for manifest line `{0}`")]
    UnknownDataSource(String),
    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),
    #[error("unable to read shapefile: {0}")]
    Shapefile(String),
    #[error("feature server request failed")]
    Http(#[from] reqwest::Error),
    #[error("unexpected feature server response: {0}")]
    UnexpectedResponse(String),
    #[error("error serializing JSON")]
    Json(#[from] serde_json::Error),
}

/// The RITIS data sources whose exports we process.
///
/// Each zip bundle from the massive data downloader covers exactly one of
/// these, identified by the description in its `Contents.txt` manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataOrigin {
    #[serde(rename = "inrix")]
    Inrix,
    #[serde(rename = "npmrds_from_inrix_pass_vehicles")]
    NpmrdsPassenger,
    #[serde(rename = "npmrds_from_inrix_trucks")]
    NpmrdsTrucks,
    #[serde(rename = "npmrds_from_inrix_trucks_and_passveh")]
    NpmrdsMixed,
}

impl DataOrigin {
    /// Classify a data source from the first line of a bundle's `Contents.txt`.
    ///
    /// The trucks-and-passenger-vehicles description contains the trucks-only
    /// description as a prefix, so it has to be tested first.
    pub fn from_manifest_line(line: &str) -> Option<Self> {
        if line.contains("INRIX TMC") {
            Some(DataOrigin::Inrix)
        } else if line.contains("NPMRDS from INRIX (Passenger vehicles)") {
            Some(DataOrigin::NpmrdsPassenger)
        } else if line.contains("NPMRDS from INRIX (Trucks and passenger vehicles)") {
            Some(DataOrigin::NpmrdsMixed)
        } else if line.contains("NPMRDS from INRIX (Trucks)") {
            Some(DataOrigin::NpmrdsTrucks)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataOrigin::Inrix => "inrix",
            DataOrigin::NpmrdsPassenger => "npmrds_from_inrix_pass_vehicles",
            DataOrigin::NpmrdsTrucks => "npmrds_from_inrix_trucks",
            DataOrigin::NpmrdsMixed => "npmrds_from_inrix_trucks_and_passveh",
        }
    }
}

impl fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of the travel-time column in a raw data export.
///
/// RITIS exports carry either `travel_time_seconds` or `travel_time_minutes`
/// depending on the options chosen at download time. Travel times are kept in
/// whichever unit the file provided; the reliability ratios are unit-invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelTimeUnit {
    Seconds,
    Minutes,
}

impl TravelTimeUnit {
    pub fn column_name(&self) -> &'static str {
        match self {
            TravelTimeUnit::Seconds => "travel_time_seconds",
            TravelTimeUnit::Minutes => "travel_time_minutes",
        }
    }
}

/// One row of a bundle's `TMC_Identification.csv`, the segment metadata that
/// accompanies every export.
#[derive(Debug, Clone, Serialize)]
pub struct TmcSegment {
    pub tmc_code: String,
    #[serde(rename = "data_origin")]
    pub origin: DataOrigin,
    /// Road name; empty when the source had none.
    pub road: String,
    pub direction: Option<String>,
    pub intersection: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub zip: Option<String>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub miles: Option<f64>,
    pub road_order: Option<f64>,
    pub timezone_name: Option<String>,
    pub active_start_date: Option<String>,
    pub active_end_date: Option<String>,
}

/// A single probe speed record, joined to the segment it was measured on.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedObservation {
    pub tmc_code: String,
    #[serde(rename = "data_origin")]
    pub origin: DataOrigin,
    pub road: String,
    pub measurement_tstamp: NaiveDateTime,
    /// Observed speed in mph.
    pub speed: f64,
    pub average_speed: Option<f64>,
    pub reference_speed: Option<f64>,
    /// Travel time over the segment, in the unit the export was downloaded in.
    pub travel_time: Option<f64>,
}

impl SpeedObservation {
    pub fn time(&self) -> NaiveTime {
        self.measurement_tstamp.time()
    }

    pub fn day_of_week(&self) -> Weekday {
        self.measurement_tstamp.weekday()
    }

    pub fn is_weekday(&self) -> bool {
        !matches!(self.day_of_week(), Weekday::Sat | Weekday::Sun)
    }

    /// Day of the year, 1-based.
    pub fn day_of_year(&self) -> u32 {
        self.measurement_tstamp.ordinal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn origin_from_manifest_line_matches_known_sources() {
        assert_eq!(
            DataOrigin::from_manifest_line("Data: INRIX TMC speeds, 15 minutes"),
            Some(DataOrigin::Inrix)
        );
        assert_eq!(
            DataOrigin::from_manifest_line("NPMRDS from INRIX (Passenger vehicles), 2022"),
            Some(DataOrigin::NpmrdsPassenger)
        );
        assert_eq!(
            DataOrigin::from_manifest_line("NPMRDS from INRIX (Trucks), 2022"),
            Some(DataOrigin::NpmrdsTrucks)
        );
    }

    #[test]
    fn origin_from_manifest_line_prefers_mixed_over_trucks() {
        // "(Trucks and passenger vehicles)" also contains "(Trucks".
        assert_eq!(
            DataOrigin::from_manifest_line("NPMRDS from INRIX (Trucks and passenger vehicles)"),
            Some(DataOrigin::NpmrdsMixed)
        );
    }

    #[test]
    fn origin_from_manifest_line_rejects_unknown_source() {
        assert_eq!(DataOrigin::from_manifest_line("TomTom speeds"), None);
    }

    #[test]
    fn observation_weekday_and_ordinal() {
        let obs = SpeedObservation {
            tmc_code: "133+04098".to_string(),
            origin: DataOrigin::NpmrdsMixed,
            road: "I-95".to_string(),
            measurement_tstamp: NaiveDate::from_ymd_opt(2022, 7, 4)
                .unwrap()
                .and_hms_opt(6, 15, 0)
                .unwrap(),
            speed: 54.0,
            average_speed: None,
            reference_speed: None,
            travel_time: Some(61.2),
        };
        assert_eq!(obs.day_of_week(), Weekday::Mon);
        assert!(obs.is_weekday());
        assert_eq!(obs.day_of_year(), 185);
        assert_eq!(obs.time(), NaiveTime::from_hms_opt(6, 15, 0).unwrap());
    }
}
