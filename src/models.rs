use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance label for records whose device/source cannot be resolved.
pub const UNKNOWN_PROVENANCE: &str = "Unknown/Manual";

/// Discipline buckets used for every per-discipline total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    Cycling,
    Running,
    Swimming,
    Other,
}

impl Discipline {
    pub const ALL: [Discipline; 4] = [
        Discipline::Cycling,
        Discipline::Running,
        Discipline::Swimming,
        Discipline::Other,
    ];

    /// Map a provider activity type onto the closed discipline set.
    ///
    /// Returns `None` for tags outside the known set; those events are
    /// unclassifiable and must be rejected downstream, never guessed.
    pub fn from_activity_type(activity_type: &str) -> Option<Self> {
        match activity_type.trim() {
            "Ride" | "VirtualRide" | "GravelRide" | "MountainBikeRide" | "EBikeRide"
            | "EMountainBikeRide" | "TrackRide" | "Velomobile" | "Handcycle" => {
                Some(Discipline::Cycling)
            }
            "Run" | "TrailRun" | "VirtualRun" | "Treadmill" => Some(Discipline::Running),
            "Swim" | "OpenWaterSwim" => Some(Discipline::Swimming),
            "Walk" | "Hike" | "WeightTraining" | "Workout" | "Rowing" | "VirtualRow" | "Yoga"
            | "Pilates" | "NordicSki" | "BackcountrySki" | "AlpineSki" | "RollerSki"
            | "Elliptical" | "StairStepper" | "Crossfit" | "HighIntensityIntervalTraining"
            | "Kayaking" | "Canoeing" | "StandUpPaddling" | "IceSkate" | "InlineSkate"
            | "Snowshoe" | "RockClimbing" => Some(Discipline::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Discipline::Cycling => "cycling",
            Discipline::Running => "running",
            Discipline::Swimming => "swimming",
            Discipline::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cycling" | "bike" | "ride" => Some(Discipline::Cycling),
            "running" | "run" => Some(Discipline::Running),
            "swimming" | "swim" => Some(Discipline::Swimming),
            "other" => Some(Discipline::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive calendar-day range a run is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window of `days` calendar days finishing on `end`.
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..i64::from(self.days())).map(move |offset| start + Duration::days(offset))
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Second-by-second detail attached to full activity records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStreams {
    pub watts: Option<Vec<f64>>,
    pub heartrate: Option<Vec<f64>>,
    pub velocity: Option<Vec<f64>>,
}

/// One logged session. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub date: NaiveDate,
    pub start: NaiveDateTime,

    /// Provider activity type, kept verbatim for the event log
    pub activity_type: String,

    /// `None` when the activity type is outside the known set
    pub discipline: Option<Discipline>,

    /// Moving time in seconds
    pub duration_secs: u32,

    /// Distance in metres
    pub distance_m: Decimal,

    /// Training load score (TSS-equivalent)
    pub load: Decimal,

    pub avg_power: Option<u16>,
    pub normalized_power: Option<u16>,
    pub intensity_factor: Option<Decimal>,
    pub avg_heart_rate: Option<u16>,

    /// Seconds spent in each zone, Z1 first
    pub zone_times: Option<Vec<u32>>,

    /// Aerobic decoupling reported by the provider (%)
    pub decoupling_pct: Option<f64>,

    pub streams: Option<ActivityStreams>,
    pub rpe: Option<u8>,
    pub feel: Option<u8>,
    pub provenance: String,
    pub tags: Vec<String>,
}

impl ActivityEvent {
    pub fn hours(&self) -> Decimal {
        Decimal::from(self.duration_secs) / Decimal::from(3600)
    }

    pub fn distance_km(&self) -> Decimal {
        self.distance_m / Decimal::from(1000)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::seconds(i64::from(self.duration_secs))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_discipline(&self, discipline: Discipline) -> bool {
        self.discipline == Some(discipline)
    }
}

/// Daily physiological sample. Missing days stay missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessSample {
    pub date: NaiveDate,
    pub hrv: Option<f64>,
    pub resting_hr: Option<f64>,
    pub sleep_secs: Option<u32>,
    pub sleep_score: Option<f64>,
    pub mood: Option<u8>,
    pub stress: Option<u8>,
    pub motivation: Option<u8>,
}

impl WellnessSample {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            hrv: None,
            resting_hr: None,
            sleep_secs: None,
            sleep_score: None,
            mood: None,
            stress: None,
            motivation: None,
        }
    }

    /// True when the provider measured at least one value for the day
    pub fn has_measurement(&self) -> bool {
        self.hrv.is_some()
            || self.resting_hr.is_some()
            || self.sleep_secs.is_some()
            || self.sleep_score.is_some()
            || self.mood.is_some()
            || self.stress.is_some()
            || self.motivation.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub id: String,
    pub age: Option<u32>,

    /// Functional threshold power (watts)
    pub ftp: Option<u16>,

    /// Lactate-threshold heart-rate markers
    pub lt1_hr: Option<u16>,
    pub lt2_hr: Option<u16>,

    pub timezone: String,

    /// Discipline counted as race-specific work
    pub target_discipline: Option<Discipline>,
}

/// Lightweight per-session record used for load history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub date: NaiveDate,
    pub duration_secs: u32,
    pub load: Decimal,
}

/// Origin of the figures the computed totals are cross-checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedSource {
    /// Summary published by the provider for the window
    ProviderSummary,
    /// Sums over the lightweight activity listing for the window
    LightweightRecords,
}

/// Independently reported window totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedTotals {
    pub source: ReportedSource,
    pub hours: Option<Decimal>,
    pub distance_km: Option<Decimal>,
    pub load: Option<Decimal>,
}
