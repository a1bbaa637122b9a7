//! Group observations into the standard FHWA cohorts and compute the
//! percentile summaries the reliability measures are built from.
//!
//! See CFR 23 490.511 and CFR 23 490.611 for the formal period definitions:
//! <https://www.ecfr.gov/current/title-23/chapter-I/subchapter-E/part-490/subpart-E/section-490.511>

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::timeslot::{LabeledObservation, TimeSlotName};
use crate::{DataOrigin, SpeedObservation};

/// The percentiles reported for both speed and travel time.
pub const SUMMARY_PERCENTILES: [f64; 9] = [1.0, 5.0, 15.0, 20.0, 50.0, 80.0, 85.0, 95.0, 99.0];

/// The six aggregation cohorts used for the standard summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cohort {
    /// AM peak on weekdays.
    #[serde(rename = "am_peak")]
    AmPeak,
    /// Midday on weekdays.
    #[serde(rename = "midday")]
    Midday,
    /// PM peak on weekdays.
    #[serde(rename = "pm_peak")]
    PmPeak,
    /// Overnight, every day of the week.
    #[serde(rename = "overnight")]
    Overnight,
    /// 6am to 8pm on weekends.
    #[serde(rename = "weekends")]
    Weekends,
    /// Every observation, no filter.
    #[serde(rename = "alltime")]
    AllTime,
}

impl Cohort {
    pub const ALL: [Cohort; 6] = [
        Cohort::AmPeak,
        Cohort::Midday,
        Cohort::PmPeak,
        Cohort::Overnight,
        Cohort::Weekends,
        Cohort::AllTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::AmPeak => "am_peak",
            Cohort::Midday => "midday",
            Cohort::PmPeak => "pm_peak",
            Cohort::Overnight => "overnight",
            Cohort::Weekends => "weekends",
            Cohort::AllTime => "alltime",
        }
    }

    /// Whether an observation belongs in this cohort.
    pub fn admits(&self, labeled: &LabeledObservation) -> bool {
        let daytime = matches!(
            labeled.time_slot,
            TimeSlotName::AmPeak | TimeSlotName::Midday | TimeSlotName::PmPeak
        );
        match self {
            Cohort::AmPeak => {
                labeled.time_slot == TimeSlotName::AmPeak
                    && labeled.in_all_days
                    && labeled.observation.is_weekday()
            }
            Cohort::Midday => {
                labeled.time_slot == TimeSlotName::Midday
                    && labeled.in_all_days
                    && labeled.observation.is_weekday()
            }
            Cohort::PmPeak => {
                labeled.time_slot == TimeSlotName::PmPeak
                    && labeled.in_all_days
                    && labeled.observation.is_weekday()
            }
            Cohort::Overnight => {
                labeled.time_slot == TimeSlotName::Overnight && labeled.in_all_days
            }
            Cohort::Weekends => {
                daytime && labeled.in_all_days && !labeled.observation.is_weekday()
            }
            Cohort::AllTime => true,
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sample values held sorted, for means and percentiles.
///
/// Non-finite values are discarded on construction.
#[derive(Debug, Clone)]
pub struct SortedSamples(Vec<f64>);

impl SortedSamples {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.iter().sum::<f64>() / self.0.len() as f64)
    }

    /// Percentile by linear interpolation between closest ranks.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let rank = q / 100.0 * (self.0.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = rank - lower as f64;
        Some(self.0[lower] + (self.0[upper] - self.0[lower]) * fraction)
    }
}

/// Summary statistics for one (cohort, data source, TMC) group.
///
/// Travel-time fields are `None` when the source file carried no travel-time
/// values for the group.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedSummary {
    pub tmc_code: String,
    #[serde(rename = "data_origin")]
    pub origin: DataOrigin,
    pub summary_type: Cohort,
    pub count_obs: u64,

    pub speed_avg: Option<f64>,
    pub speed_01p: Option<f64>,
    pub speed_05p: Option<f64>,
    pub speed_15p: Option<f64>,
    pub speed_20p: Option<f64>,
    pub speed_50p: Option<f64>,
    pub speed_80p: Option<f64>,
    pub speed_85p: Option<f64>,
    pub speed_95p: Option<f64>,
    pub speed_99p: Option<f64>,

    pub ttime_avg: Option<f64>,
    pub ttime_01p: Option<f64>,
    pub ttime_05p: Option<f64>,
    pub ttime_15p: Option<f64>,
    pub ttime_20p: Option<f64>,
    pub ttime_50p: Option<f64>,
    pub ttime_80p: Option<f64>,
    pub ttime_85p: Option<f64>,
    pub ttime_95p: Option<f64>,
    pub ttime_99p: Option<f64>,
}

/// Compute the summaries for every cohort.
///
/// Groups are emitted in (cohort, data source, TMC) order, so output is
/// deterministic run to run.
pub fn summarize(observations: &[LabeledObservation]) -> Vec<SpeedSummary> {
    let mut summaries = vec![];
    for cohort in Cohort::ALL {
        let mut groups: BTreeMap<(DataOrigin, &str), Vec<&SpeedObservation>> = BTreeMap::new();
        for labeled in observations.iter().filter(|l| cohort.admits(l)) {
            groups
                .entry((labeled.observation.origin, labeled.observation.tmc_code.as_str()))
                .or_default()
                .push(&labeled.observation);
        }
        for ((origin, tmc_code), group) in groups {
            summaries.push(summarize_group(cohort, origin, tmc_code, &group));
        }
    }
    summaries
}

fn summarize_group(
    cohort: Cohort,
    origin: DataOrigin,
    tmc_code: &str,
    group: &[&SpeedObservation],
) -> SpeedSummary {
    let speeds = SortedSamples::new(group.iter().map(|obs| obs.speed));
    let ttimes = SortedSamples::new(group.iter().filter_map(|obs| obs.travel_time));

    SpeedSummary {
        tmc_code: tmc_code.to_string(),
        origin,
        summary_type: cohort,
        count_obs: group.len() as u64,

        speed_avg: speeds.mean(),
        speed_01p: speeds.percentile(1.0),
        speed_05p: speeds.percentile(5.0),
        speed_15p: speeds.percentile(15.0),
        speed_20p: speeds.percentile(20.0),
        speed_50p: speeds.percentile(50.0),
        speed_80p: speeds.percentile(80.0),
        speed_85p: speeds.percentile(85.0),
        speed_95p: speeds.percentile(95.0),
        speed_99p: speeds.percentile(99.0),

        ttime_avg: ttimes.mean(),
        ttime_01p: ttimes.percentile(1.0),
        ttime_05p: ttimes.percentile(5.0),
        ttime_15p: ttimes.percentile(15.0),
        ttime_20p: ttimes.percentile(20.0),
        ttime_50p: ttimes.percentile(50.0),
        ttime_80p: ttimes.percentile(80.0),
        ttime_85p: ttimes.percentile(85.0),
        ttime_95p: ttimes.percentile(95.0),
        ttime_99p: ttimes.percentile(99.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_timestamp;
    use crate::timeslot::label_observations;

    fn observation(tstamp: &str, speed: f64) -> SpeedObservation {
        SpeedObservation {
            tmc_code: "133+04098".to_string(),
            origin: DataOrigin::NpmrdsMixed,
            road: "I-95".to_string(),
            measurement_tstamp: parse_timestamp(tstamp).unwrap(),
            speed,
            average_speed: None,
            reference_speed: None,
            travel_time: Some(3600.0 / speed),
        }
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let samples = SortedSamples::new([5.0, 3.0, 1.0, 2.0, 4.0]);
        assert_eq!(samples.percentile(50.0), Some(3.0));
        assert_eq!(samples.percentile(0.0), Some(1.0));
        assert_eq!(samples.percentile(100.0), Some(5.0));
        // rank = 0.8 * 4 = 3.2, so 4 + 0.2 * (5 - 4)
        assert!((samples.percentile(80.0).unwrap() - 4.2).abs() < 1e-9);
        // rank = 0.95 * 4 = 3.8
        assert!((samples.percentile(95.0).unwrap() - 4.8).abs() < 1e-9);
    }

    #[test]
    fn percentile_of_single_sample_is_that_sample() {
        let samples = SortedSamples::new([42.0]);
        for q in SUMMARY_PERCENTILES {
            assert_eq!(samples.percentile(q), Some(42.0));
        }
        assert_eq!(samples.mean(), Some(42.0));
    }

    #[test]
    fn non_finite_samples_are_discarded() {
        let samples = SortedSamples::new([f64::NAN, 2.0, f64::INFINITY, 4.0]);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.mean(), Some(3.0));

        let empty = SortedSamples::new([f64::NAN]);
        assert!(empty.is_empty());
        assert_eq!(empty.percentile(50.0), None);
        assert_eq!(empty.mean(), None);
    }

    #[test]
    fn cohorts_split_weekday_and_weekend() {
        // 2021-03-01 is a Monday, 2021-03-06 a Saturday.
        let observations = label_observations(vec![
            observation("2021-03-01 07:00:00", 50.0),
            observation("2021-03-06 07:00:00", 55.0),
        ]);

        let weekday_am = &observations[0];
        let weekend_am = &observations[1];

        assert!(Cohort::AmPeak.admits(weekday_am));
        assert!(!Cohort::AmPeak.admits(weekend_am));
        assert!(Cohort::Weekends.admits(weekend_am));
        assert!(!Cohort::Weekends.admits(weekday_am));
        assert!(Cohort::AllTime.admits(weekday_am));
        assert!(Cohort::AllTime.admits(weekend_am));
    }

    #[test]
    fn overnight_cohort_covers_all_days_of_week() {
        let observations = label_observations(vec![
            observation("2021-03-01 22:00:00", 60.0),
            observation("2021-03-06 22:00:00", 62.0),
        ]);
        assert!(Cohort::Overnight.admits(&observations[0]));
        assert!(Cohort::Overnight.admits(&observations[1]));
    }

    #[test]
    fn summarize_emits_one_row_per_cohort_and_group() {
        let observations = label_observations(vec![
            observation("2021-03-01 07:00:00", 50.0),
            observation("2021-03-01 07:15:00", 48.0),
            observation("2021-03-01 12:00:00", 55.0),
        ]);
        let summaries = summarize(&observations);

        let am: Vec<_> = summaries
            .iter()
            .filter(|s| s.summary_type == Cohort::AmPeak)
            .collect();
        assert_eq!(am.len(), 1);
        assert_eq!(am[0].count_obs, 2);
        assert_eq!(am[0].speed_avg, Some(49.0));
        assert_eq!(am[0].speed_50p, Some(49.0));

        let alltime: Vec<_> = summaries
            .iter()
            .filter(|s| s.summary_type == Cohort::AllTime)
            .collect();
        assert_eq!(alltime.len(), 1);
        assert_eq!(alltime[0].count_obs, 3);

        // No weekend observations, so no weekend rows at all.
        assert!(!summaries.iter().any(|s| s.summary_type == Cohort::Weekends));
    }

    #[test]
    fn summary_travel_time_is_none_when_source_lacked_it() {
        let mut obs = observation("2021-03-01 07:00:00", 50.0);
        obs.travel_time = None;
        let summaries = summarize(&label_observations(vec![obs]));
        assert!(summaries.iter().all(|s| s.ttime_50p.is_none()));
        assert!(summaries.iter().all(|s| s.speed_50p.is_some()));
    }
}
