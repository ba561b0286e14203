//! Canonical Totals Enforcer.
//!
//! Totals are sums over event fields and nothing else. Durations are
//! summed in whole seconds and hours derived from that sum, never from
//! per-event rounded hours.

use crate::models::{ActivityEvent, DateWindow, Discipline};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisciplineTotals {
    pub event_count: u32,
    pub duration_secs: u64,
    pub hours: Decimal,
    pub distance_km: Decimal,
    pub load: Decimal,

    /// Duration-weighted mean over events that report intensity
    pub avg_intensity: Option<Decimal>,

    /// Duration-weighted mean over events that report heart rate
    pub avg_heart_rate: Option<Decimal>,
}

impl DisciplineTotals {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ActivityEvent>) -> Self {
        let mut totals = Self::default();
        let mut distance_m = Decimal::ZERO;
        let mut intensity = WeightedMean::default();
        let mut heart_rate = WeightedMean::default();

        for event in events {
            totals.event_count += 1;
            totals.duration_secs += u64::from(event.duration_secs);
            distance_m += event.distance_m;
            totals.load += event.load;

            let weight = Decimal::from(event.duration_secs);
            if let Some(value) = event.intensity_factor {
                intensity.add(value, weight);
            }
            if let Some(hr) = event.avg_heart_rate {
                heart_rate.add(Decimal::from(hr), weight);
            }
        }

        totals.hours = Decimal::from(totals.duration_secs) / Decimal::from(3600);
        totals.distance_km = distance_m / Decimal::from(1000);
        totals.avg_intensity = intensity.value().map(|v| v.round_dp(3));
        totals.avg_heart_rate = heart_rate.value().map(|v| v.round_dp(1));
        totals
    }
}

#[derive(Default)]
struct WeightedMean {
    sum: Decimal,
    weight: Decimal,
}

impl WeightedMean {
    fn add(&mut self, value: Decimal, weight: Decimal) {
        self.sum += value * weight;
        self.weight += weight;
    }

    fn value(&self) -> Option<Decimal> {
        (self.weight > Decimal::ZERO).then(|| self.sum / self.weight)
    }
}

/// "All activities" totals plus one bucket per discipline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub window: DateWindow,
    pub all: DisciplineTotals,
    pub by_discipline: BTreeMap<Discipline, DisciplineTotals>,
}

impl WindowAggregate {
    pub fn discipline(&self, discipline: Discipline) -> Option<&DisciplineTotals> {
        self.by_discipline.get(&discipline)
    }

    /// Buckets that should exist but do not
    pub fn missing_buckets(&self) -> Vec<Discipline> {
        Discipline::ALL
            .into_iter()
            .filter(|d| !self.by_discipline.contains_key(d))
            .collect()
    }
}

/// Build the aggregate. Every discipline bucket is present, zeroed when
/// the window holds no events of that kind.
pub fn aggregate(window: DateWindow, events: &[ActivityEvent]) -> WindowAggregate {
    let by_discipline = Discipline::ALL
        .into_iter()
        .map(|discipline| {
            let totals = DisciplineTotals::from_events(events.iter().filter(|e| e.is_discipline(discipline)));
            (discipline, totals)
        })
        .collect();

    let aggregate = WindowAggregate {
        window,
        all: DisciplineTotals::from_events(events),
        by_discipline,
    };

    tracing::debug!(
        events = aggregate.all.event_count,
        hours = %aggregate.all.hours,
        load = %aggregate.all.load,
        "window totals"
    );
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn event(id: &str, discipline: Discipline, secs: u32, km: Decimal, load: Decimal) -> ActivityEvent {
        let date = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
        ActivityEvent {
            id: id.into(),
            date,
            start: date.and_hms_opt(6, 0, 0).unwrap(),
            activity_type: "Workout".into(),
            discipline: Some(discipline),
            duration_secs: secs,
            distance_m: km * dec!(1000),
            load,
            avg_power: None,
            normalized_power: None,
            intensity_factor: None,
            avg_heart_rate: None,
            zone_times: None,
            decoupling_pct: None,
            streams: None,
            rpe: None,
            feel: None,
            provenance: "Garmin".into(),
            tags: Vec::new(),
        }
    }

    fn window() -> DateWindow {
        DateWindow::ending(NaiveDate::from_ymd_opt(2024, 5, 12).unwrap(), 7)
    }

    #[test]
    fn test_totals_are_event_sums() {
        let events = vec![
            event("r1", Discipline::Cycling, 5400, dec!(45.2), dec!(90)),
            event("r2", Discipline::Cycling, 3600, dec!(30), dec!(55)),
            event("run", Discipline::Running, 2700, dec!(9.5), dec!(48)),
        ];
        let agg = aggregate(window(), &events);

        assert_eq!(agg.all.event_count, 3);
        assert_eq!(agg.all.duration_secs, 11700);
        assert_eq!(agg.all.hours, dec!(3.25));
        assert_eq!(agg.all.distance_km, dec!(84.7));
        assert_eq!(agg.all.load, dec!(193));

        let cycling = agg.discipline(Discipline::Cycling).unwrap();
        assert_eq!(cycling.hours, dec!(2.5));
        assert_eq!(cycling.load, dec!(145));
    }

    #[test]
    fn test_all_four_buckets_present_when_empty() {
        let agg = aggregate(window(), &[]);
        assert!(agg.missing_buckets().is_empty());
        for discipline in Discipline::ALL {
            let bucket = agg.discipline(discipline).unwrap();
            assert_eq!(bucket.event_count, 0);
            assert_eq!(bucket.hours, Decimal::ZERO);
        }

        let json = serde_json::to_value(&agg).unwrap();
        for key in ["cycling", "running", "swimming", "other"] {
            assert!(json["by_discipline"].get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_weighted_intensity() {
        let mut long = event("long", Discipline::Cycling, 7200, dec!(60), dec!(100));
        long.intensity_factor = Some(dec!(0.70));
        let mut short = event("short", Discipline::Cycling, 3600, dec!(25), dec!(70));
        short.intensity_factor = Some(dec!(0.85));
        let no_data = event("easy", Discipline::Cycling, 3600, dec!(25), dec!(30));

        let agg = aggregate(window(), &[long, short, no_data]);
        assert_eq!(agg.all.avg_intensity, Some(dec!(0.75)));
        assert_eq!(agg.all.avg_heart_rate, None);
    }
}
