//! Record Normalizer: raw provider payloads into canonical collections.

use crate::error::{PayloadError, Result};
use crate::models::{
    ActivityEvent, ActivityStreams, AthleteProfile, DateWindow, Discipline, HistoryEntry,
    ReportedSource, ReportedTotals, WellnessSample, UNKNOWN_PROVENANCE,
};
use crate::upstream::{RawActivity, RawBundle, RawProfile, RawWellness, RawZoneTime};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Canonical inputs for stages 2 through 9 of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDataset {
    pub window: DateWindow,
    pub profile: AthleteProfile,

    /// Full-detail events dated inside the window, ordered by start time
    pub events: Vec<ActivityEvent>,

    /// Wellness samples ordered by date. Duplicated dates are kept for
    /// the integrity validator to reject.
    pub wellness: Vec<WellnessSample>,

    /// Per-session loads over the history range, window events included
    pub history: Vec<HistoryEntry>,

    pub reported: Option<ReportedTotals>,
    pub planned_sessions: Option<u32>,
}

impl NormalizedDataset {
    /// Distinct dates carrying an activity, or a rest day with a measured
    /// wellness value. Placeholder wellness rows do not count.
    pub fn recorded_dates(&self) -> HashSet<NaiveDate> {
        self.events
            .iter()
            .map(|e| e.date)
            .chain(self.wellness.iter().filter(|w| w.has_measurement()).map(|w| w.date))
            .filter(|d| self.window.contains(*d))
            .collect()
    }
}

/// Normalize one fetched bundle for `window`.
pub fn normalize(window: DateWindow, bundle: RawBundle) -> Result<NormalizedDataset> {
    let profile = normalize_profile(bundle.profile);

    let mut events = Vec::with_capacity(bundle.full.len());
    for raw in bundle.full {
        if let Some(event) = normalize_activity(raw)? {
            events.push(event);
        }
    }
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

    let mut wellness = Vec::with_capacity(bundle.wellness.len());
    for raw in bundle.wellness {
        wellness.push(normalize_wellness(raw)?);
    }
    wellness.sort_by_key(|w| w.date);

    let mut light = Vec::with_capacity(bundle.light.activities.len());
    for raw in bundle.light.activities {
        if let Some(event) = normalize_activity(raw)? {
            light.push(event);
        }
    }

    let summary = bundle.light.summary;
    let planned_sessions = summary.as_ref().and_then(|s| s.planned_sessions);
    let reported = match summary {
        Some(s) if s.hours.is_some() || s.distance_km.is_some() || s.load.is_some() => {
            Some(ReportedTotals {
                source: ReportedSource::ProviderSummary,
                hours: s.hours,
                distance_km: s.distance_km,
                load: s.load,
            })
        }
        _ => lightweight_totals(window, &light),
    };

    let history = merge_history(&light, &events);

    tracing::debug!(
        events = events.len(),
        wellness = wellness.len(),
        history = history.len(),
        reported = ?reported.as_ref().map(|r| r.source),
        "normalized upstream records"
    );

    Ok(NormalizedDataset {
        window,
        profile,
        events,
        wellness,
        history,
        reported,
        planned_sessions,
    })
}

fn normalize_profile(raw: RawProfile) -> AthleteProfile {
    AthleteProfile {
        id: raw.id.unwrap_or_default(),
        age: raw.age,
        ftp: raw.ftp.and_then(positive_u16),
        lt1_hr: raw.lt1_hr.and_then(positive_u16),
        lt2_hr: raw.lt2_hr.and_then(positive_u16),
        timezone: raw.timezone.unwrap_or_else(|| "UTC".to_string()),
        target_discipline: raw.target_discipline.as_deref().and_then(Discipline::parse),
    }
}

fn positive_u16(value: f64) -> Option<u16> {
    (value.is_finite() && value > 0.0 && value <= f64::from(u16::MAX)).then(|| value.round() as u16)
}

/// Subjective 1-5 scale; anything else is treated as not recorded
fn scale_1_to_5(value: Option<f64>) -> Option<u8> {
    value.filter(|v| (1.0..=5.0).contains(v)).map(|v| v.round() as u8)
}

fn provenance(raw: &RawActivity) -> String {
    [raw.device_name.as_deref(), raw.source.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_PROVENANCE)
        .to_string()
}

fn parse_start(raw: &RawActivity, id: &str) -> Result<NaiveDateTime> {
    let value = raw.start_date_local.as_deref().ok_or_else(|| PayloadError::MissingField {
        record: id.to_string(),
        field: "start_date_local".to_string(),
    })?;
    let trimmed = value.trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| {
            PayloadError::InvalidDate {
                record: id.to_string(),
                value: value.to_string(),
            }
            .into()
        })
}

/// Zone seconds ordered Z1.. ; labelled entries outside `Z<n>` are ignored.
fn zone_seconds(raw: &[RawZoneTime]) -> Vec<u32> {
    let mut labelled: Vec<(usize, u32)> = Vec::new();
    let mut plain: Vec<u32> = Vec::new();
    for zone in raw {
        match zone {
            RawZoneTime::Labelled { id, secs } => {
                if let Some(n) = id.strip_prefix('Z').and_then(|n| n.parse::<usize>().ok()) {
                    if n > 0 {
                        labelled.push((n, *secs));
                    }
                }
            }
            RawZoneTime::Plain(secs) => plain.push(*secs),
        }
    }
    if labelled.is_empty() {
        return plain;
    }
    let zones = labelled.iter().map(|(n, _)| *n).max().unwrap_or(0);
    let mut seconds = vec![0u32; zones];
    for (n, secs) in labelled {
        seconds[n - 1] += secs;
    }
    seconds
}

/// Intensity arrives either as a fraction or as a percentage of threshold
fn intensity_factor(raw: Option<Decimal>) -> Option<Decimal> {
    raw.filter(|v| *v > Decimal::ZERO).map(|v| {
        if v > Decimal::from(10) {
            v / Decimal::from(100)
        } else {
            v
        }
    })
}

/// Returns `None` for records without moving time: they carry no
/// session content at all.
pub fn normalize_activity(raw: RawActivity) -> Result<Option<ActivityEvent>> {
    let id = raw
        .id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| PayloadError::MissingField {
            record: raw.start_date_local.clone().unwrap_or_else(|| "<activity>".into()),
            field: "id".to_string(),
        })?;

    let moving_time = raw.moving_time.unwrap_or(0);
    if moving_time <= 0 {
        tracing::trace!(id = %id, "skipping record without moving time");
        return Ok(None);
    }

    let start = parse_start(&raw, &id)?;
    let activity_type = raw.activity_type.clone().unwrap_or_default();
    let rpe = raw.icu_rpe.or(raw.session_rpe);

    let streams = raw.streams.as_ref().map(|s| ActivityStreams {
        watts: s.watts.clone(),
        heartrate: s.heartrate.clone(),
        velocity: s.velocity_smooth.clone(),
    });

    Ok(Some(ActivityEvent {
        date: start.date(),
        start,
        discipline: Discipline::from_activity_type(&activity_type),
        activity_type,
        duration_secs: u32::try_from(moving_time).unwrap_or(u32::MAX),
        distance_m: raw.distance.unwrap_or(Decimal::ZERO).max(Decimal::ZERO),
        load: raw.icu_training_load.unwrap_or(Decimal::ZERO).max(Decimal::ZERO),
        avg_power: raw.icu_average_watts.and_then(positive_u16),
        normalized_power: raw.icu_weighted_avg_watts.and_then(positive_u16),
        intensity_factor: intensity_factor(raw.icu_intensity),
        avg_heart_rate: raw.average_heartrate.and_then(positive_u16),
        zone_times: raw.icu_zone_times.as_deref().map(zone_seconds),
        decoupling_pct: raw.decoupling.filter(|d| d.is_finite()),
        streams,
        rpe: rpe.filter(|v| (1.0..=10.0).contains(v)).map(|v| v.round() as u8),
        feel: scale_1_to_5(raw.feel),
        provenance: provenance(&raw),
        tags: raw.tags,
        id,
    }))
}

pub fn normalize_wellness(raw: RawWellness) -> Result<WellnessSample> {
    let date = raw.date().ok_or_else(|| PayloadError::InvalidDate {
        record: "wellness".to_string(),
        value: raw.id.clone().unwrap_or_default(),
    })?;
    Ok(WellnessSample {
        date,
        hrv: raw.hrv.filter(|v| v.is_finite() && *v > 0.0),
        resting_hr: raw.resting_hr.filter(|v| v.is_finite() && *v > 0.0),
        sleep_secs: raw.sleep_secs.filter(|v| *v > 0.0).and_then(|v| v.round().to_u32()),
        sleep_score: raw.sleep_score.filter(|v| v.is_finite()),
        mood: scale_1_to_5(raw.mood),
        stress: scale_1_to_5(raw.stress),
        motivation: scale_1_to_5(raw.motivation),
    })
}

fn lightweight_totals(window: DateWindow, light: &[ActivityEvent]) -> Option<ReportedTotals> {
    let in_window: Vec<&ActivityEvent> = light.iter().filter(|e| window.contains(e.date)).collect();
    if in_window.is_empty() {
        return None;
    }
    let secs: u64 = in_window.iter().map(|e| u64::from(e.duration_secs)).sum();
    Some(ReportedTotals {
        source: ReportedSource::LightweightRecords,
        hours: Some(Decimal::from(secs) / Decimal::from(3600)),
        distance_km: Some(in_window.iter().map(|e| e.distance_km()).sum()),
        load: Some(in_window.iter().map(|e| e.load).sum()),
    })
}

fn merge_history(light: &[ActivityEvent], events: &[ActivityEvent]) -> Vec<HistoryEntry> {
    let mut seen = HashSet::new();
    let mut history: Vec<HistoryEntry> = light
        .iter()
        .chain(events.iter())
        .filter(|e| seen.insert(e.id.clone()))
        .map(|e| HistoryEntry {
            id: e.id.clone(),
            date: e.date,
            duration_secs: e.duration_secs,
            load: e.load,
        })
        .collect();
    history.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    history
}
