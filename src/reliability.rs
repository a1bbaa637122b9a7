//! Level of Travel Time Reliability (LOTTR) scoring.
//!
//! For mixed traffic, the score for a segment is the worst 80th/50th
//! travel-time percentile ratio across the four weekday/weekend periods, and
//! a segment is reliable when that worst ratio stays under 1.5. For trucks
//! the ratio is 95th/50th over five periods (overnight included) and the
//! continuous ratio is the headline number, though the same threshold flag is
//! reported.
//!
//! See "National Performance Measures for Congestion, Reliability, and
//! Freight, and CMAQ Traffic Congestion":
//! <https://www.fhwa.dot.gov/tpm/guidance/hif18040.pdf>

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::summarize::{Cohort, SpeedSummary};
use crate::timeslot::LabeledObservation;
use crate::DataOrigin;

/// A segment whose worst LOTTR reaches this value is not reliable.
pub const LOTTR_RELIABLE_MAX: f64 = 1.5;

/// Which traffic population a score covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReliabilityKind {
    #[serde(rename = "Mixed_Traffic")]
    MixedTraffic,
    #[serde(rename = "Truck_Traffic")]
    TruckTraffic,
}

impl ReliabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityKind::MixedTraffic => "Mixed_Traffic",
            ReliabilityKind::TruckTraffic => "Truck_Traffic",
        }
    }
}

impl fmt::Display for ReliabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The reliability verdict for one segment.
///
/// Metric fields are `None` for segments re-added after scoring because they
/// lacked summaries for every required period.
#[derive(Debug, Clone, Serialize)]
pub struct ReliabilityScore {
    pub tmc_code: String,
    #[serde(rename = "data_origin")]
    pub origin: DataOrigin,
    #[serde(rename = "reliability_type")]
    pub kind: ReliabilityKind,
    /// Raw observations behind the score, summed over the scored periods.
    pub raw_data_rows: Option<u64>,
    /// How many periods had a computable ratio.
    pub summary_count: Option<u32>,
    /// Worst (largest) LOTTR across the scored periods.
    pub reliability: Option<f64>,
    pub reliable: Option<bool>,
}

/// Score mixed (car and truck) traffic: 80th/50th over the four daytime
/// periods, all four required.
pub fn score_mixed_traffic(summaries: &[SpeedSummary]) -> Vec<ReliabilityScore> {
    score_cohorts(
        summaries,
        ReliabilityKind::MixedTraffic,
        &[DataOrigin::Inrix, DataOrigin::NpmrdsMixed],
        &[Cohort::AmPeak, Cohort::Midday, Cohort::PmPeak, Cohort::Weekends],
        |summary| summary.ttime_80p,
    )
}

/// Score truck traffic: 95th/50th over five periods, overnight included.
pub fn score_truck_traffic(summaries: &[SpeedSummary]) -> Vec<ReliabilityScore> {
    score_cohorts(
        summaries,
        ReliabilityKind::TruckTraffic,
        &[DataOrigin::NpmrdsTrucks],
        &[
            Cohort::AmPeak,
            Cohort::Midday,
            Cohort::PmPeak,
            Cohort::Overnight,
            Cohort::Weekends,
        ],
        |summary| summary.ttime_95p,
    )
}

fn score_cohorts(
    summaries: &[SpeedSummary],
    kind: ReliabilityKind,
    origins: &[DataOrigin],
    cohorts: &[Cohort],
    numerator: fn(&SpeedSummary) -> Option<f64>,
) -> Vec<ReliabilityScore> {
    let required = cohorts.len() as u32;

    let mut groups: BTreeMap<(String, DataOrigin), Vec<&SpeedSummary>> = BTreeMap::new();
    for summary in summaries
        .iter()
        .filter(|s| cohorts.contains(&s.summary_type) && origins.contains(&s.origin))
    {
        groups
            .entry((summary.tmc_code.clone(), summary.origin))
            .or_default()
            .push(summary);
    }

    let mut scores = vec![];
    for ((tmc_code, origin), rows) in groups {
        let mut raw_data_rows = 0;
        let mut summary_count = 0;
        let mut worst: Option<f64> = None;

        for row in rows {
            raw_data_rows += row.count_obs;
            let (Some(high), Some(median)) = (numerator(row), row.ttime_50p) else {
                continue;
            };
            let ratio = high / median;
            summary_count += 1;
            worst = Some(worst.map_or(ratio, |w| w.max(ratio)));
        }

        // A segment without a ratio for every required period is not scored;
        // it gets re-added with null metrics later.
        if summary_count < required {
            continue;
        }

        scores.push(ReliabilityScore {
            tmc_code,
            origin,
            kind,
            raw_data_rows: Some(raw_data_rows),
            summary_count: Some(summary_count),
            reliability: worst,
            reliable: worst.map(|w| w < LOTTR_RELIABLE_MAX),
        });
    }
    scores
}

/// Re-add every TMC present in the raw data but absent from the scored set,
/// with null metrics, so no segment silently disappears from the output.
fn append_missing_segments(
    scores: &mut Vec<ReliabilityScore>,
    observations: &[LabeledObservation],
    kind: ReliabilityKind,
    fallback_origin: DataOrigin,
) {
    let scored: HashSet<String> = scores.iter().map(|s| s.tmc_code.clone()).collect();
    let origin = scores.first().map(|s| s.origin).unwrap_or(fallback_origin);

    let mut seen = HashSet::new();
    for labeled in observations {
        let tmc_code = labeled.observation.tmc_code.as_str();
        if seen.insert(tmc_code) && !scored.contains(tmc_code) {
            scores.push(ReliabilityScore {
                tmc_code: tmc_code.to_string(),
                origin,
                kind,
                raw_data_rows: None,
                summary_count: None,
                reliability: None,
                reliable: None,
            });
        }
    }
}

/// Run the requested reliability computations over the summary table.
pub fn score_all(
    summaries: &[SpeedSummary],
    observations: &[LabeledObservation],
    calc_mixed: bool,
    calc_trucks: bool,
) -> Vec<ReliabilityScore> {
    let mut all = vec![];
    if calc_mixed {
        let mut scores = score_mixed_traffic(summaries);
        append_missing_segments(
            &mut scores,
            observations,
            ReliabilityKind::MixedTraffic,
            DataOrigin::NpmrdsMixed,
        );
        all.extend(scores);
    }
    if calc_trucks {
        let mut scores = score_truck_traffic(summaries);
        append_missing_segments(
            &mut scores,
            observations,
            ReliabilityKind::TruckTraffic,
            DataOrigin::NpmrdsTrucks,
        );
        all.extend(scores);
    }
    all
}
