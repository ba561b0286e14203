//! Plain-text summary of a finished audit.
//!
//! Only results with `audit_final` set are rendered. Any missing section
//! or an event-log/event-count mismatch refuses the render outright.

use crate::assembler::AuditResult;
use crate::error::{AuditError, Result};
use crate::metrics::{DerivedMetricSet, MetricReading};
use crate::models::Discipline;
use crate::totals::DisciplineTotals;
use std::fmt::Write;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct TotalsRow {
    #[tabled(rename = "Discipline")]
    discipline: String,
    #[tabled(rename = "Sessions")]
    sessions: u32,
    #[tabled(rename = "Hours")]
    hours: String,
    #[tabled(rename = "Distance km")]
    distance: String,
    #[tabled(rename = "Load")]
    load: String,
}

impl TotalsRow {
    fn new(name: &str, totals: &DisciplineTotals) -> Self {
        Self {
            discipline: name.to_string(),
            sessions: totals.event_count,
            hours: totals.hours.round_dp(2).to_string(),
            distance: totals.distance_km.round_dp(1).to_string(),
            load: totals.load.round_dp(0).to_string(),
        }
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Activity")]
    activity: String,
    #[tabled(rename = "Hours")]
    hours: String,
    #[tabled(rename = "km")]
    distance: String,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Source")]
    source: String,
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Band")]
    band: String,
    #[tabled(rename = "Δ prior")]
    delta: String,
}

fn metric_rows(set: &DerivedMetricSet) -> Vec<MetricRow> {
    let read = set.readings.iter().map(|(key, reading)| MetricRow {
        metric: key.name().to_string(),
        value: format_value(reading),
        band: reading
            .band
            .as_ref()
            .map(|b| format!("{} ({:?})", b.label, b.level))
            .unwrap_or_default(),
        delta: reading.delta.map(|d| format!("{:+.2}", d)).unwrap_or_default(),
    });
    let withheld = set.withheld.iter().map(|(key, reason)| MetricRow {
        metric: key.name().to_string(),
        value: "withheld".to_string(),
        band: reason.clone(),
        delta: String::new(),
    });
    read.chain(withheld).collect()
}

fn format_value(reading: &MetricReading) -> String {
    if reading.value.abs() >= 100.0 {
        format!("{:.0}", reading.value)
    } else {
        format!("{:.2}", reading.value)
    }
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::modern()).to_string()
}

fn refuse(reason: impl Into<String>) -> AuditError {
    AuditError::Render(reason.into())
}

/// Render every canonical section of a final result.
pub fn summary(result: &AuditResult) -> Result<String> {
    if !result.audit_final {
        return Err(refuse(match &result.halt {
            Some(halt) => format!("audit halted: {}", halt),
            None => "audit is not final".to_string(),
        }));
    }
    let totals = result.totals.as_ref().ok_or_else(|| refuse("missing section: totals"))?;
    let events = result.events.as_ref().ok_or_else(|| refuse("missing section: events"))?;
    let derived = result.derived.as_ref().ok_or_else(|| refuse("missing section: derived metrics"))?;
    let extended = result.extended.as_ref().ok_or_else(|| refuse("missing section: extended metrics"))?;
    let actions = result.actions.as_ref().ok_or_else(|| refuse("missing section: actions"))?;

    if events.len() as u32 != totals.all.event_count {
        return Err(refuse(format!(
            "event log has {} rows for {} events",
            events.len(),
            totals.all.event_count
        )));
    }

    let mut out = String::new();
    let ctx = &result.context;
    writeln!(out, "Training audit: athlete {} | {}", result.athlete_id, result.window).ok();
    writeln!(
        out,
        "Run {} | rules {} ({})",
        result.run_id,
        result.config.version,
        &result.config.fingerprint[..result.config.fingerprint.len().min(12)]
    )
    .ok();

    writeln!(out, "\nTotals").ok();
    let mut rows = Vec::with_capacity(Discipline::ALL.len() + 1);
    for discipline in Discipline::ALL {
        let bucket = totals
            .discipline(discipline)
            .ok_or_else(|| refuse(format!("missing discipline bucket: {}", discipline)))?;
        rows.push(TotalsRow::new(discipline.as_str(), bucket));
    }
    rows.push(TotalsRow::new("all", &totals.all));
    writeln!(out, "{}", table(rows)).ok();

    writeln!(out, "\nEvent log").ok();
    let rows: Vec<EventRow> = events
        .iter()
        .map(|e| EventRow {
            date: e.date.to_string(),
            activity: e.activity_type.clone(),
            hours: e.hours.to_string(),
            distance: e.distance_km.round_dp(1).to_string(),
            load: e.load.round_dp(0).to_string(),
            source: e.provenance.clone(),
        })
        .collect();
    writeln!(out, "{}", table(rows)).ok();

    writeln!(out, "\nLoad, recovery and intensity").ok();
    writeln!(out, "{}", table(metric_rows(&derived.set))).ok();

    writeln!(out, "\nPerformance").ok();
    writeln!(out, "{}", table(metric_rows(&extended.set))).ok();
    writeln!(
        out,
        "Phase: {} ({})",
        extended.phase.phase,
        extended.phase.phase.description()
    )
    .ok();
    writeln!(
        out,
        "Quality sessions: {} long, {} interval (target {}{})",
        extended.quality.long_sessions,
        extended.quality.interval_sessions,
        extended.quality.target,
        if extended.quality.met { ", met" } else { ", not met" }
    )
    .ok();

    writeln!(out, "\nActions").ok();
    if actions.is_empty() {
        writeln!(out, "  none").ok();
    }
    for action in actions {
        writeln!(out, "  {}. {}", action.priority, action.text).ok();
    }

    if !ctx.outliers.is_empty() || !ctx.review_flags.is_empty() || !ctx.integrity_flags.is_empty() {
        writeln!(out, "\nData notes").ok();
        for flag in &ctx.integrity_flags {
            writeln!(out, "  - {}", flag).ok();
        }
        for outlier in &ctx.outliers {
            writeln!(
                out,
                "  - {} {} = {} (limit {})",
                outlier.event_id, outlier.field, outlier.value, outlier.limit
            )
            .ok();
        }
        for flag in &ctx.review_flags {
            writeln!(
                out,
                "  - {} possible duplicate: {} ({} s overlap)",
                flag.date,
                flag.event_ids.join(", "),
                flag.overlap_secs
            )
            .ok();
        }
    }

    Ok(out)
}
