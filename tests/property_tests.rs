use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use trainaudit::metrics::derived::DerivedMetricsEngine;
use trainaudit::normalize::NormalizedDataset;
use trainaudit::totals::aggregate;
use trainaudit::*;

fn window() -> DateWindow {
    DateWindow::ending(NaiveDate::from_ymd_opt(2024, 9, 28).unwrap(), 28)
}

fn event(index: usize, day: u32, discipline: Discipline, secs: u32, load: u32) -> ActivityEvent {
    let date = window().start + Duration::days(i64::from(day));
    ActivityEvent {
        id: format!("e{}", index),
        date,
        start: date.and_hms_opt(6, 0, 0).unwrap() + Duration::minutes(index as i64),
        activity_type: "Workout".to_string(),
        discipline: Some(discipline),
        duration_secs: secs,
        distance_m: Decimal::from(secs) * Decimal::from(3),
        load: Decimal::from(load),
        avg_power: None,
        normalized_power: None,
        intensity_factor: None,
        avg_heart_rate: None,
        zone_times: None,
        decoupling_pct: None,
        streams: None,
        rpe: None,
        feel: None,
        provenance: "Garmin".to_string(),
        tags: Vec::new(),
    }
}

fn discipline() -> impl Strategy<Value = Discipline> {
    prop::sample::select(Discipline::ALL.to_vec())
}

fn events() -> impl Strategy<Value = Vec<ActivityEvent>> {
    prop::collection::vec((0u32..28, discipline(), 1u32..20_000, 0u32..400), 0..40).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (day, discipline, secs, load))| event(i, day, discipline, secs, load))
            .collect()
    })
}

fn dataset(events: Vec<ActivityEvent>) -> NormalizedDataset {
    let history = events
        .iter()
        .map(|e| HistoryEntry {
            id: e.id.clone(),
            date: e.date,
            duration_secs: e.duration_secs,
            load: e.load,
        })
        .collect();
    NormalizedDataset {
        window: window(),
        profile: AthleteProfile {
            id: "p".to_string(),
            age: Some(44),
            ftp: None,
            lt1_hr: None,
            lt2_hr: None,
            timezone: "UTC".to_string(),
            target_discipline: None,
        },
        events,
        wellness: Vec::new(),
        history,
        reported: None,
        planned_sessions: None,
    }
}

proptest! {
    #[test]
    fn totals_equal_event_sums_exactly(events in events()) {
        let agg = aggregate(window(), &events);
        let secs: u64 = events.iter().map(|e| u64::from(e.duration_secs)).sum();
        let load: Decimal = events.iter().map(|e| e.load).sum();

        prop_assert_eq!(agg.all.duration_secs, secs);
        prop_assert_eq!((agg.all.hours * Decimal::from(3600)).round_dp(6), Decimal::from(secs));
        prop_assert_eq!(agg.all.load, load);
        prop_assert_eq!(agg.by_discipline.len(), 4);

        let bucket_secs: u64 = agg.by_discipline.values().map(|t| t.duration_secs).sum();
        let bucket_count: u32 = agg.by_discipline.values().map(|t| t.event_count).sum();
        prop_assert_eq!(bucket_secs, secs);
        prop_assert_eq!(bucket_count as usize, events.len());
    }

    #[test]
    fn every_finite_value_has_exactly_one_band(value in -10.0f64..10.0) {
        let bands = AuditConfig::default().bands;
        for table in [&bands.acwr, &bands.monotony, &bands.stress_balance, &bands.durability] {
            prop_assert!(table.classify(value).is_some());
        }
    }

    #[test]
    fn derived_metrics_are_deterministic(events in events()) {
        let config = AuditConfig::default();
        let data = dataset(events);
        let agg = aggregate(data.window, &data.events);
        let engine = DerivedMetricsEngine::new(&config);

        let first = engine.compute(&data, &agg, &PriorSnapshot::default());
        let second = engine.compute(&data, &agg, &PriorSnapshot::default());
        prop_assert_eq!(first, second);
    }
}
