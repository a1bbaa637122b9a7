//! Classify observations into FHWA time-of-day slots and day-of-year windows.
//!
//! The standard daily periods are:
//!   - AM peak:   6am up to (not including) 10am
//!   - Midday:    10am up to 4pm
//!   - PM peak:   4pm up to 8pm
//!   - Overnight: 8pm through 6am
//!
//! Windows over the calendar use the same construction on day-of-year
//! ordinals. Only a single all-year window is defined today; the type exists
//! so seasonal comparisons can be added without touching the classification
//! logic.

use std::fmt;

use chrono::NaiveTime;
use log::warn;
use serde::Serialize;

use crate::SpeedObservation;

/// The four standard FHWA daily periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlotName {
    AmPeak,
    Midday,
    PmPeak,
    Overnight,
}

impl TimeSlotName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlotName::AmPeak => "am_peak",
            TimeSlotName::Midday => "midday",
            TimeSlotName::PmPeak => "pm_peak",
            TimeSlotName::Overnight => "overnight",
        }
    }
}

impl fmt::Display for TimeSlotName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a slot covers the span between its bounds or the complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Interior,
    Exterior,
}

/// A window of the day with explicit boundary-inclusion flags.
///
/// Membership is strict inequality against both bounds (for `Exterior`,
/// strictly before the start or strictly after the end), with boundary
/// equality OR-ed in per flag. This makes half-open intervals like
/// \[6am, 10am) direct to express.
#[derive(Debug, Clone, Copy)]
pub struct TimeSlot {
    pub name: TimeSlotName,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub include_start: bool,
    pub include_end: bool,
    pub coverage: Coverage,
}

impl TimeSlot {
    pub fn contains(&self, time: NaiveTime) -> bool {
        let inside = match self.coverage {
            Coverage::Interior => self.start < time && time < self.end,
            Coverage::Exterior => time < self.start || self.end < time,
        };
        inside
            || (self.include_start && time == self.start)
            || (self.include_end && time == self.end)
    }
}

/// A window of the year delimited by day-of-year ordinals (1-based).
#[derive(Debug, Clone, Copy)]
pub struct DayWindow {
    pub start: u32,
    pub end: u32,
    pub include_start: bool,
    pub include_end: bool,
    pub coverage: Coverage,
}

impl DayWindow {
    pub fn contains(&self, day_of_year: u32) -> bool {
        let inside = match self.coverage {
            Coverage::Interior => self.start < day_of_year && day_of_year < self.end,
            Coverage::Exterior => day_of_year < self.start || self.end < day_of_year,
        };
        inside
            || (self.include_start && day_of_year == self.start)
            || (self.include_end && day_of_year == self.end)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    // Safe for the constants below; hour/minute are always in range.
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

/// The four standard periods. Together they partition the day: every time of
/// day belongs to exactly one slot.
pub fn standard_fhwa_slots() -> [TimeSlot; 4] {
    [
        TimeSlot {
            name: TimeSlotName::AmPeak,
            start: hm(6, 0),
            end: hm(10, 0),
            include_start: true,
            include_end: false,
            coverage: Coverage::Interior,
        },
        TimeSlot {
            name: TimeSlotName::Midday,
            start: hm(10, 0),
            end: hm(16, 0),
            include_start: true,
            include_end: false,
            coverage: Coverage::Interior,
        },
        TimeSlot {
            name: TimeSlotName::PmPeak,
            start: hm(16, 0),
            end: hm(20, 0),
            include_start: true,
            include_end: false,
            coverage: Coverage::Interior,
        },
        // Before 6am or from 8pm on.
        TimeSlot {
            name: TimeSlotName::Overnight,
            start: hm(6, 0),
            end: hm(20, 0),
            include_start: false,
            include_end: true,
            coverage: Coverage::Exterior,
        },
    ]
}

/// The single all-year window used for the standard reliability summaries.
pub fn standard_all_days_window() -> DayWindow {
    DayWindow {
        start: 1,
        end: 365,
        include_start: true,
        include_end: true,
        coverage: Coverage::Interior,
    }
}

/// Find the slot a time of day falls in.
pub fn classify_time(slots: &[TimeSlot], time: NaiveTime) -> Option<TimeSlotName> {
    slots.iter().find(|slot| slot.contains(time)).map(|s| s.name)
}

/// An observation labeled with its daily period and window membership.
#[derive(Debug, Clone)]
pub struct LabeledObservation {
    pub observation: SpeedObservation,
    pub time_slot: TimeSlotName,
    pub in_all_days: bool,
}

/// Label every observation with the standard slots and all-days window.
pub fn label_observations(observations: Vec<SpeedObservation>) -> Vec<LabeledObservation> {
    let slots = standard_fhwa_slots();
    let window = standard_all_days_window();

    observations
        .into_iter()
        .filter_map(|observation| {
            let Some(time_slot) = classify_time(&slots, observation.time()) else {
                warn!(
                    "No time slot for observation at {}.",
                    observation.measurement_tstamp
                );
                return None;
            };
            let in_all_days = window.contains(observation.day_of_year());
            Some(LabeledObservation {
                observation,
                time_slot,
                in_all_days,
            })
        })
        .collect()
}
