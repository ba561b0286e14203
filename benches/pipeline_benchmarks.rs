use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use trainaudit::load::LoadModel;
use trainaudit::normalize::normalize;
use trainaudit::upstream::{fetch_bundle, FetchRequest, RawActivity, RawStreams, RawZoneTime};
use trainaudit::*;

/// Benchmarks for full audit runs and the load model
///
/// Datasets grow with the window length so per-day cost stays visible.

fn end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
}

fn create_payload(days: u32) -> UpstreamPayload {
    let history = DateWindow::ending(end_date(), days.max(42));
    let activities = history
        .dates()
        .enumerate()
        .map(|(i, date)| {
            let secs = 3600 + (i as i64 % 5) * 900;
            let with_streams = i % 7 == 0;
            RawActivity {
                id: Some(format!("b{}", i)),
                start_date_local: Some(format!("{}T06:30:00", date)),
                activity_type: Some(if i % 3 == 0 { "Run" } else { "Ride" }.to_string()),
                moving_time: Some(secs),
                distance: Some(Decimal::from(secs * 8)),
                icu_training_load: Some(Decimal::from(40 + (i as i64 % 6) * 15)),
                icu_intensity: Some(Decimal::from(68 + (i as i64 % 4) * 3)),
                icu_rpe: Some(3.0),
                decoupling: Some(2.5),
                icu_zone_times: Some(
                    [0.35, 0.45, 0.1, 0.05, 0.05]
                        .iter()
                        .enumerate()
                        .map(|(z, share)| RawZoneTime::Labelled {
                            id: format!("Z{}", z + 1),
                            secs: (secs as f64 * share) as u32,
                        })
                        .collect(),
                ),
                device_name: Some("Garmin Edge 540".to_string()),
                streams: with_streams.then(|| RawStreams {
                    watts: Some((0..secs).map(|s| 210.0 - (s as f64 / secs as f64) * 8.0).collect()),
                    heartrate: Some((0..secs).map(|s| 135.0 + (s as f64 / secs as f64) * 6.0).collect()),
                    velocity_smooth: None,
                }),
                ..Default::default()
            }
        })
        .collect();

    UpstreamPayload {
        activities,
        ..Default::default()
    }
}

fn bench_full_run(c: &mut Criterion) {
    let pipeline = AuditPipeline::new(AuditConfig::default()).unwrap();
    let mut group = c.benchmark_group("Audit Run");

    for &days in &[7u32, 28, 42] {
        let payload = create_payload(days);
        let window = DateWindow::ending(end_date(), days);
        let request = AuditRequest::new("bench", window, end_date() + Duration::days(1));

        group.throughput(Throughput::Elements(u64::from(days)));
        group.bench_with_input(BenchmarkId::new("run", days), &payload, |b, payload| {
            b.iter(|| {
                let mut source = PayloadSource::new(payload.clone());
                let result = pipeline.run(&request, &mut source, &PriorSnapshot::default());
                black_box(result)
            });
        });
    }

    group.finish();
}

fn bench_stages_on_normalized(c: &mut Criterion) {
    let pipeline = AuditPipeline::new(AuditConfig::default()).unwrap();
    let window = DateWindow::ending(end_date(), 42);
    let request = AuditRequest::new("bench", window, end_date() + Duration::days(1));
    let config = AuditConfig::default();
    let fetch = FetchRequest::new("bench", window, config.load.history_days, config.recovery.baseline_days);
    let mut source = PayloadSource::new(create_payload(90));
    let data = normalize(window, fetch_bundle(&mut source, &fetch).unwrap()).unwrap();

    c.bench_function("run_normalized_42d", |b| {
        b.iter(|| black_box(pipeline.run_normalized(&request, &data, &PriorSnapshot::default())))
    });
}

fn bench_load_model(c: &mut Criterion) {
    let config = AuditConfig::default();
    let model = LoadModel::new(&config.load);
    let mut group = c.benchmark_group("Load Model");

    for &days in &[42u32, 180, 365] {
        let history: Vec<HistoryEntry> = DateWindow::ending(end_date(), days)
            .dates()
            .enumerate()
            .map(|(i, date)| HistoryEntry {
                id: format!("h{}", i),
                date,
                duration_secs: 3600,
                load: Decimal::from(30 + (i % 9) as i64 * 10),
            })
            .collect();

        group.throughput(Throughput::Elements(u64::from(days)));
        group.bench_with_input(BenchmarkId::new("snapshot", days), &history, |b, history| {
            b.iter(|| black_box(model.snapshot(history, end_date())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_full_run, bench_stages_on_normalized, bench_load_model);
criterion_main!(benches);
