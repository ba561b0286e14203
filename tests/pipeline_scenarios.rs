// End-to-end audit runs against in-memory upstream payloads

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trainaudit::audit::{TrackedField, ViolationKind};
use trainaudit::error::Result as AuditResultT;
use trainaudit::normalize::normalize;
use trainaudit::render;
use trainaudit::upstream::{
    fetch_bundle, FetchRequest, LightFeed, RawActivity, RawProfile, RawSummary, RawWellness,
};
use trainaudit::*;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn activity(id: &str, date: NaiveDate, kind: &str, secs: i64, load: Decimal) -> RawActivity {
    RawActivity {
        id: Some(id.to_string()),
        start_date_local: Some(format!("{}T07:00:00", date)),
        activity_type: Some(kind.to_string()),
        moving_time: Some(secs),
        distance: Some(dec!(30000)),
        icu_training_load: Some(load),
        device_name: Some("Garmin Edge 540".to_string()),
        ..Default::default()
    }
}

fn profile() -> RawProfile {
    RawProfile {
        id: Some("i1234".to_string()),
        age: Some(41),
        ftp: Some(260.0),
        ..Default::default()
    }
}

/// One session a day through the window plus four weeks of base history
fn week_payload(durations: [i64; 7], loads: [Decimal; 7], summary: Option<RawSummary>) -> UpstreamPayload {
    let window = clean_window();
    let mut activities: Vec<RawActivity> = window
        .dates()
        .enumerate()
        .map(|(i, date)| activity(&format!("w{}", i), date, "Ride", durations[i], loads[i]))
        .collect();
    for (i, date) in DateWindow::ending(d(2024, 6, 2), 28).dates().enumerate() {
        if i % 2 == 0 {
            activities.push(activity(&format!("h{}", i), date, "Run", 3600, dec!(60)));
        }
    }
    UpstreamPayload {
        profile: profile(),
        activities,
        summary,
        ..Default::default()
    }
}

fn clean_window() -> DateWindow {
    DateWindow::new(d(2024, 6, 3), d(2024, 6, 9)).unwrap()
}

fn request(window: DateWindow) -> AuditRequest {
    AuditRequest::new("i1234", window, window.end.succ_opt().unwrap())
}

fn pipeline() -> AuditPipeline {
    AuditPipeline::new(AuditConfig::default()).unwrap()
}

fn clean_payload() -> UpstreamPayload {
    week_payload(
        [5400, 5400, 5400, 5400, 5400, 5400, 3600],
        [dec!(100), dec!(100), dec!(100), dec!(100), dec!(100), dec!(100), dec!(50)],
        Some(RawSummary {
            hours: Some(dec!(10.0)),
            load: Some(dec!(650)),
            ..Default::default()
        }),
    )
}

/// Serves a different payload on each fetch attempt
struct Attempts {
    payloads: Vec<PayloadSource>,
    calls: usize,
}

impl Attempts {
    fn new(payloads: Vec<UpstreamPayload>) -> Self {
        Self {
            payloads: payloads.into_iter().map(PayloadSource::new).collect(),
            calls: 0,
        }
    }

    fn current(&mut self) -> &mut PayloadSource {
        let index = self.calls.saturating_sub(1).min(self.payloads.len() - 1);
        &mut self.payloads[index]
    }
}

impl UpstreamSource for Attempts {
    fn fetch_profile(&mut self, request: &FetchRequest) -> AuditResultT<RawProfile> {
        self.calls += 1;
        self.current().fetch_profile(request)
    }

    fn fetch_light_activities(&mut self, request: &FetchRequest) -> AuditResultT<LightFeed> {
        self.current().fetch_light_activities(request)
    }

    fn fetch_wellness(&mut self, request: &FetchRequest) -> AuditResultT<Vec<RawWellness>> {
        self.current().fetch_wellness(request)
    }

    fn fetch_full_activities(&mut self, request: &FetchRequest) -> AuditResultT<Vec<RawActivity>> {
        self.current().fetch_full_activities(request)
    }
}

fn sparse_payload(window: DateWindow, covered: usize) -> UpstreamPayload {
    UpstreamPayload {
        profile: profile(),
        activities: window
            .dates()
            .take(covered)
            .map(|date| activity(&format!("s{}", date), date, "Run", 2700, dec!(45)))
            .collect(),
        ..Default::default()
    }
}

#[test]
fn coverage_shortfall_after_retry_halts() {
    let window = DateWindow::ending(d(2024, 5, 20), 50);
    let mut upstream = Attempts::new(vec![sparse_payload(window, 35), sparse_payload(window, 36)]);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert_eq!(upstream.calls, 2);
    assert!(!result.audit_final);
    assert_eq!(result.status, AuditStatus::Halted);
    match result.halt_reason() {
        Some(HaltReason::CoverageFailure {
            covered_days,
            expected_days,
            coverage,
            attempts,
            missing_dates,
            ..
        }) => {
            assert_eq!(*covered_days, 36);
            assert_eq!(*expected_days, 50);
            assert_eq!(*coverage, dec!(0.72));
            assert_eq!(*attempts, 2);
            assert_eq!(missing_dates.len(), 14);
        }
        other => panic!("expected coverage failure, got {:?}", other),
    }
    assert!(result.derived.is_none());
    assert!(result.extended.is_none());
    assert!(result.actions.is_none());
}

/// Sparse activities plus one wellness row per window day
fn sparse_payload_with_wellness(window: DateWindow, covered: usize, measured: bool) -> UpstreamPayload {
    let wellness = window
        .dates()
        .map(|date| RawWellness {
            id: Some(date.to_string()),
            hrv: measured.then_some(64.0),
            ..Default::default()
        })
        .collect();
    UpstreamPayload {
        wellness,
        ..sparse_payload(window, covered)
    }
}

#[test]
fn empty_wellness_rows_do_not_satisfy_coverage() {
    let window = DateWindow::ending(d(2024, 5, 20), 50);
    let payload = sparse_payload_with_wellness(window, 35, false);
    let mut upstream = Attempts::new(vec![payload.clone(), payload]);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert_eq!(upstream.calls, 2);
    assert!(!result.audit_final);
    match result.halt_reason() {
        Some(HaltReason::CoverageFailure { covered_days, expected_days, .. }) => {
            assert_eq!(*covered_days, 35);
            assert_eq!(*expected_days, 50);
        }
        other => panic!("expected coverage failure, got {:?}", other),
    }
    assert!(result.derived.is_none());
}

#[test]
fn measured_rest_days_count_toward_coverage() {
    let window = clean_window();
    let mut upstream = PayloadSource::new(sparse_payload_with_wellness(window, 4, true));

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert_eq!(result.context.fetch_attempts, 1);
    assert!(!matches!(result.halt_reason(), Some(HaltReason::CoverageFailure { .. })));
}

#[test]
fn coverage_recovered_on_retry_completes() {
    let window = clean_window();
    let mut upstream = Attempts::new(vec![sparse_payload(window, 5), sparse_payload(window, 7)]);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert!(result.audit_final, "halted: {:?}", result.halt);
    assert_eq!(result.context.fetch_attempts, 2);
    assert_eq!(result.totals.unwrap().all.event_count, 7);
}

#[test]
fn clean_week_passes_with_load_metrics() {
    let window = clean_window();
    let mut upstream = PayloadSource::new(clean_payload());

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert!(result.audit_final, "halted: {:?}", result.halt);
    assert_eq!(result.status, AuditStatus::Final);

    let totals = result.totals.as_ref().unwrap();
    assert_eq!(totals.all.event_count, 7);
    assert_eq!(totals.all.hours, dec!(10));
    assert_eq!(totals.all.load, dec!(650));

    let derived = result.derived.as_ref().unwrap();
    for key in [MetricKey::Acwr, MetricKey::Monotony, MetricKey::Strain] {
        let reading = derived.set.get(key).unwrap_or_else(|| panic!("{:?} missing", key));
        assert!(reading.band.is_some(), "{:?} has no band", key);
    }
    for key in [MetricKey::ChronicLoad, MetricKey::AcuteLoad, MetricKey::FitnessTrend, MetricKey::LoadTrend] {
        assert!(derived.set.get(key).is_some(), "{:?} missing", key);
    }
    assert!(derived.set.is_withheld(MetricKey::EfficiencyFactor));

    assert_eq!(result.events.as_ref().unwrap().len(), 7);
    assert_eq!(result.days.as_ref().unwrap().len(), 7);
    assert!(result.actions.as_ref().unwrap().len() <= 5);
    assert_eq!(result.config.fingerprint, AuditConfig::default().fingerprint().unwrap());
    assert!(result
        .context
        .variance_notes
        .iter()
        .any(|n| n.field == TrackedField::Hours && n.expected == Some(dec!(10.0))));
}

#[test]
fn reported_hours_gap_halts_with_variance() {
    let window = clean_window();
    let payload = week_payload(
        [5400, 5400, 5400, 5400, 5400, 5400, 2880],
        [dec!(90); 7],
        Some(RawSummary {
            hours: Some(dec!(10.2)),
            ..Default::default()
        }),
    );
    let mut upstream = PayloadSource::new(payload);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert!(!result.audit_final);
    match result.halt_reason() {
        Some(HaltReason::VarianceExceeded {
            field,
            observed,
            expected,
            ..
        }) => {
            assert_eq!(*field, TrackedField::Hours);
            assert_eq!(*observed, dec!(9.8));
            assert_eq!(*expected, dec!(10.2));
        }
        other => panic!("expected variance halt, got {:?}", other),
    }
    assert!(result.totals.is_none());
    assert!(result.derived.is_none());
}

#[test]
fn halted_run_carries_no_later_stage_output() {
    let window = clean_window();
    let mut payload = clean_payload();
    payload.activities[1].id = payload.activities[0].id.clone();
    let mut upstream = PayloadSource::new(payload);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    assert!(!result.audit_final);
    assert!(matches!(
        result.halt_reason(),
        Some(HaltReason::CompletenessViolation {
            kind: ViolationKind::DuplicateId,
            ..
        })
    ));
    assert!(!result.context.completed_stages.contains(&Stage::Integrity));
    assert!(result.totals.is_none() && result.days.is_none() && result.events.is_none());
    assert!(result.derived.is_none() && result.extended.is_none() && result.actions.is_none());
    assert!(render::summary(&result).is_err());
}

#[test]
fn untrusted_source_halts() {
    let window = clean_window();
    let mut payload = clean_payload();
    payload.activities[2].device_name = Some("mock".to_string());
    let mut upstream = PayloadSource::new(payload);

    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();
    assert!(matches!(
        result.halt_reason(),
        Some(HaltReason::CompletenessViolation {
            kind: ViolationKind::UntrustedSource,
            ..
        })
    ));
}

#[test]
fn four_discipline_buckets_always_present() {
    let window = clean_window();
    let mut upstream = PayloadSource::new(clean_payload());
    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    let totals = result.totals.unwrap();
    assert_eq!(totals.by_discipline.len(), 4);
    for discipline in Discipline::ALL {
        assert!(totals.discipline(discipline).is_some());
    }
    let swimming = totals.discipline(Discipline::Swimming).unwrap();
    assert_eq!(swimming.event_count, 0);
    assert_eq!(swimming.hours, Decimal::ZERO);
}

#[test]
fn acwr_band_boundaries() {
    let config = AuditConfig::default();
    let label = |v: f64| config.bands.acwr.classify(v).unwrap().label.as_str();
    assert_eq!(label(0.8), "balanced");
    assert_eq!(label(1.3), "balanced");
    assert_eq!(label(1.31), "caution");
    assert_eq!(label(1.51), "high risk");
}

#[test]
fn identical_input_gives_identical_metrics() {
    let window = clean_window();
    let config = AuditConfig::default();
    let fetch = FetchRequest::new("i1234", window, config.load.history_days, config.recovery.baseline_days);
    let mut source = PayloadSource::new(clean_payload());
    let data = normalize(window, fetch_bundle(&mut source, &fetch).unwrap()).unwrap();

    let pipeline = pipeline();
    let mut prior = PriorSnapshot::default();
    prior.values.insert(MetricKey::Acwr, 1.0);

    let first = pipeline.run_normalized(&request(window), &data, &prior).unwrap();
    let second = pipeline.run_normalized(&request(window), &data, &prior).unwrap();

    assert!(first.audit_final);
    assert_eq!(first.derived, second.derived);
    assert_eq!(first.extended, second.extended);
    assert_eq!(first.actions, second.actions);
    assert!(first.derived.unwrap().set.get(MetricKey::Acwr).unwrap().delta.is_some());
}

#[test]
fn cancelled_run_produces_nothing() {
    let window = clean_window();
    let token = CancelToken::new();
    token.cancel();
    let mut upstream = PayloadSource::new(clean_payload());

    let err = pipeline()
        .run_with_cancel(&request(window), &mut upstream, &PriorSnapshot::default(), &token)
        .unwrap_err();
    assert!(matches!(err, AuditError::Cancelled { stage: Stage::Normalize }));
}

#[test]
fn window_ending_after_today_is_rejected() {
    let window = clean_window();
    let early = AuditRequest::new("i1234", window, d(2024, 6, 5));
    let mut upstream = PayloadSource::new(clean_payload());
    let err = pipeline()
        .run(&early, &mut upstream, &PriorSnapshot::default())
        .unwrap_err();
    assert!(matches!(err, AuditError::InvalidRequest(_)));
}

#[test]
fn batch_runs_are_independent() {
    let window = clean_window();
    let halting = week_payload(
        [5400, 5400, 5400, 5400, 5400, 5400, 2880],
        [dec!(90); 7],
        Some(RawSummary {
            hours: Some(dec!(10.2)),
            ..Default::default()
        }),
    );
    let jobs = vec![
        AuditJob {
            request: request(window),
            upstream: PayloadSource::new(clean_payload()),
            prior: PriorSnapshot::default(),
        },
        AuditJob {
            request: request(window),
            upstream: PayloadSource::new(halting),
            prior: PriorSnapshot::default(),
        },
    ];

    let results = pipeline().run_batch(jobs, &CancelToken::new());
    assert_eq!(results.len(), 2);
    let first = results[0].as_ref().unwrap();
    let second = results[1].as_ref().unwrap();
    assert!(first.audit_final);
    assert!(!second.audit_final);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn final_result_renders_every_section() {
    let window = clean_window();
    let mut upstream = PayloadSource::new(clean_payload());
    let result = pipeline()
        .run(&request(window), &mut upstream, &PriorSnapshot::default())
        .unwrap();

    let text = render::summary(&result).unwrap();
    for section in ["Totals", "Event log", "Load, recovery and intensity", "Performance", "Actions"] {
        assert!(text.contains(section), "missing {}", section);
    }
    assert!(text.contains("swimming"));

    let mut tampered = result.clone();
    tampered.events.as_mut().unwrap().pop();
    assert!(matches!(render::summary(&tampered), Err(AuditError::Render(_))));
}
