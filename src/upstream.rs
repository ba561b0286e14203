//! Boundary with the upstream data collaborator.
//!
//! Raw records mirror the provider's activity/wellness JSON. Fetching
//! always happens in one fixed order: profile, lightweight activities,
//! wellness, full activities.

use crate::error::{AuditError, PayloadError, Result, UpstreamError};
use crate::models::DateWindow;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

/// Accept ids published either as JSON strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProfile {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub age: Option<u32>,
    #[serde(alias = "icu_ftp")]
    pub ftp: Option<f64>,
    pub lt1_hr: Option<f64>,
    #[serde(alias = "lthr")]
    pub lt2_hr: Option<f64>,
    pub timezone: Option<String>,
    pub target_discipline: Option<String>,
}

/// Zone time in either `{id, secs}` or bare-seconds form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawZoneTime {
    Labelled { id: String, secs: u32 },
    Plain(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStreams {
    pub watts: Option<Vec<f64>>,
    pub heartrate: Option<Vec<f64>>,
    pub velocity_smooth: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawActivity {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub start_date_local: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    pub moving_time: Option<i64>,
    pub distance: Option<Decimal>,
    pub icu_training_load: Option<Decimal>,
    pub icu_intensity: Option<Decimal>,
    pub icu_average_watts: Option<f64>,
    pub icu_weighted_avg_watts: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub icu_rpe: Option<f64>,
    pub session_rpe: Option<f64>,
    pub feel: Option<f64>,
    pub icu_zone_times: Option<Vec<RawZoneTime>>,
    pub decoupling: Option<f64>,
    pub device_name: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub streams: Option<RawStreams>,
}

impl RawActivity {
    /// Calendar date prefix of `start_date_local`
    pub fn date(&self) -> Option<NaiveDate> {
        self.start_date_local
            .as_deref()
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWellness {
    /// Provider keys wellness rows by ISO date
    #[serde(alias = "date")]
    pub id: Option<String>,
    pub hrv: Option<f64>,
    #[serde(rename = "restingHR")]
    pub resting_hr: Option<f64>,
    #[serde(rename = "sleepSecs")]
    pub sleep_secs: Option<f64>,
    #[serde(rename = "sleepScore")]
    pub sleep_score: Option<f64>,
    pub mood: Option<f64>,
    pub stress: Option<f64>,
    pub motivation: Option<f64>,
}

impl RawWellness {
    pub fn date(&self) -> Option<NaiveDate> {
        self.id
            .as_deref()
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }
}

/// Summary figures published by the provider for the window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSummary {
    pub hours: Option<Decimal>,
    pub distance_km: Option<Decimal>,
    pub load: Option<Decimal>,
    pub planned_sessions: Option<u32>,
}

/// Lightweight activity listing plus any window summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightFeed {
    pub activities: Vec<RawActivity>,
    pub summary: Option<RawSummary>,
}

/// Date ranges requested for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub athlete_id: String,
    pub window: DateWindow,
    pub history: DateWindow,
    pub wellness: DateWindow,
}

impl FetchRequest {
    pub fn new(athlete_id: impl Into<String>, window: DateWindow, history_days: u32, wellness_days: u32) -> Self {
        let history_days = history_days.max(window.days());
        let wellness_days = wellness_days.max(window.days());
        Self {
            athlete_id: athlete_id.into(),
            window,
            history: DateWindow::ending(window.end, history_days),
            wellness: DateWindow::ending(window.end, wellness_days),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStep {
    Profile,
    LightActivities,
    Wellness,
    FullActivities,
}

impl FetchStep {
    pub const ORDER: [FetchStep; 4] = [
        FetchStep::Profile,
        FetchStep::LightActivities,
        FetchStep::Wellness,
        FetchStep::FullActivities,
    ];
}

/// Supplier of raw records for a run.
///
/// Implementations are owned by a single run; [`fetch_bundle`] decides the
/// call order, not the implementation.
pub trait UpstreamSource {
    fn fetch_profile(&mut self, request: &FetchRequest) -> Result<RawProfile>;
    fn fetch_light_activities(&mut self, request: &FetchRequest) -> Result<LightFeed>;
    fn fetch_wellness(&mut self, request: &FetchRequest) -> Result<Vec<RawWellness>>;
    fn fetch_full_activities(&mut self, request: &FetchRequest) -> Result<Vec<RawActivity>>;
}

/// Everything fetched for one attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBundle {
    pub profile: RawProfile,
    pub light: LightFeed,
    pub wellness: Vec<RawWellness>,
    pub full: Vec<RawActivity>,
}

pub fn fetch_bundle<U: UpstreamSource + ?Sized>(source: &mut U, request: &FetchRequest) -> Result<RawBundle> {
    let mut bundle = RawBundle::default();
    for step in FetchStep::ORDER {
        tracing::debug!(athlete = %request.athlete_id, ?step, "fetching");
        match step {
            FetchStep::Profile => bundle.profile = source.fetch_profile(request)?,
            FetchStep::LightActivities => bundle.light = source.fetch_light_activities(request)?,
            FetchStep::Wellness => bundle.wellness = source.fetch_wellness(request)?,
            FetchStep::FullActivities => bundle.full = source.fetch_full_activities(request)?,
        }
    }
    Ok(bundle)
}

/// Upstream payload stored as a single JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPayload {
    pub profile: RawProfile,
    #[serde(default)]
    pub activities: Vec<RawActivity>,
    /// Separate lightweight listing; `activities` doubles for it when absent
    #[serde(default)]
    pub light_activities: Option<Vec<RawActivity>>,
    #[serde(default)]
    pub wellness: Vec<RawWellness>,
    #[serde(default)]
    pub summary: Option<RawSummary>,
}

/// In-memory source that slices a payload by the requested ranges
#[derive(Debug, Clone)]
pub struct PayloadSource {
    payload: UpstreamPayload,
}

impl PayloadSource {
    pub fn new(payload: UpstreamPayload) -> Self {
        Self { payload }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AuditError::Upstream(UpstreamError::NotFound {
                path: path.to_path_buf(),
            }));
        }
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    fn in_range(activities: &[RawActivity], range: DateWindow) -> Result<Vec<RawActivity>> {
        let mut selected = Vec::new();
        for activity in activities {
            let date = activity.date().ok_or_else(|| PayloadError::InvalidDate {
                record: activity.id.clone().unwrap_or_else(|| "<activity>".into()),
                value: activity.start_date_local.clone().unwrap_or_default(),
            })?;
            if range.contains(date) {
                selected.push(activity.clone());
            }
        }
        Ok(selected)
    }
}

impl UpstreamSource for PayloadSource {
    fn fetch_profile(&mut self, _request: &FetchRequest) -> Result<RawProfile> {
        Ok(self.payload.profile.clone())
    }

    fn fetch_light_activities(&mut self, request: &FetchRequest) -> Result<LightFeed> {
        let listing = self
            .payload
            .light_activities
            .as_deref()
            .unwrap_or(&self.payload.activities);
        let activities = Self::in_range(listing, request.history)?
            .into_iter()
            .map(|a| RawActivity {
                streams: None,
                ..a
            })
            .collect();
        Ok(LightFeed {
            activities,
            summary: self.payload.summary.clone(),
        })
    }

    fn fetch_wellness(&mut self, request: &FetchRequest) -> Result<Vec<RawWellness>> {
        Ok(self
            .payload
            .wellness
            .iter()
            .filter(|w| w.date().map_or(true, |d| request.wellness.contains(d)))
            .cloned()
            .collect())
    }

    fn fetch_full_activities(&mut self, request: &FetchRequest) -> Result<Vec<RawActivity>> {
        Self::in_range(&self.payload.activities, request.window)
    }
}
