//! Event Completeness Classifier: one record per calendar day.

use crate::audit::{AuditContext, Halt, HaltReason, ReviewFlag, Stage, StageResult, ViolationKind};
use crate::config::IntegrityRules;
use crate::models::{ActivityEvent, DateWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayClass {
    /// No session logged
    Rest,
    /// Today; sessions may still be in progress
    Current,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub class: DayClass,
    pub event_ids: Vec<String>,
}

pub fn classify_day(date: NaiveDate, today: NaiveDate, sessions: usize) -> DayClass {
    if date == today {
        DayClass::Current
    } else if sessions == 0 {
        DayClass::Rest
    } else {
        DayClass::Normal
    }
}

/// Classify every day of `window` and flag suspected duplicate sessions.
///
/// Suspected duplicates go to `ctx.review_flags`; both events stay.
pub fn classify(
    window: DateWindow,
    today: NaiveDate,
    events: &[ActivityEvent],
    rules: &IntegrityRules,
    ctx: &mut AuditContext,
) -> StageResult<Vec<DayRecord>> {
    let outside: Vec<String> = events
        .iter()
        .filter(|e| !window.contains(e.date))
        .map(|e| e.id.clone())
        .collect();
    if !outside.is_empty() {
        return Err(Halt::new(
            Stage::Completeness,
            HaltReason::CompletenessViolation {
                kind: ViolationKind::OutsideWindow,
                ids: outside,
            },
        ));
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<&ActivityEvent>> = BTreeMap::new();
    for event in events {
        by_date.entry(event.date).or_default().push(event);
    }

    let days = window
        .dates()
        .map(|date| {
            let sessions = by_date.get(&date).map(Vec::as_slice).unwrap_or(&[]);
            for flag in suspected_duplicates(date, sessions, rules) {
                tracing::info!(date = %flag.date, ids = ?flag.event_ids, "same-day sessions flagged for review");
                ctx.review_flags.push(flag);
            }
            DayRecord {
                date,
                class: classify_day(date, today, sessions.len()),
                event_ids: sessions.iter().map(|e| e.id.clone()).collect(),
            }
        })
        .collect();

    Ok(days)
}

fn suspected_duplicates(date: NaiveDate, sessions: &[&ActivityEvent], rules: &IntegrityRules) -> Vec<ReviewFlag> {
    let mut flags = Vec::new();
    for (i, a) in sessions.iter().enumerate() {
        for b in &sessions[i + 1..] {
            if a.discipline != b.discipline {
                continue;
            }
            let overlap = (a.end().min(b.end()) - a.start.max(b.start)).num_seconds();
            let shorter = i64::from(a.duration_secs.min(b.duration_secs));
            if shorter == 0 || overlap <= rules.duplicate_overlap_secs {
                continue;
            }
            if overlap as f64 / shorter as f64 > rules.duplicate_overlap_fraction {
                flags.push(ReviewFlag {
                    date,
                    event_ids: vec![a.id.clone(), b.id.clone()],
                    overlap_secs: overlap,
                });
            }
        }
    }
    flags
}
