//! Dataset Integrity Validator: coverage, duplication and source checks.

use crate::audit::{AuditContext, Halt, HaltReason, Outlier, Stage, StageResult, ViolationKind};
use crate::config::IntegrityRules;
use crate::models::ActivityEvent;
use crate::normalize::NormalizedDataset;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

/// Share of window days with at least one upstream record
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub covered_days: u32,
    pub expected_days: u32,
    pub coverage: Decimal,
    pub missing_dates: Vec<NaiveDate>,
}

impl CoverageReport {
    pub fn meets(&self, threshold: Decimal) -> bool {
        self.coverage >= threshold
    }
}

pub struct IntegrityValidator<'a> {
    rules: &'a IntegrityRules,
}

impl<'a> IntegrityValidator<'a> {
    pub fn new(rules: &'a IntegrityRules) -> Self {
        Self { rules }
    }

    pub fn coverage(&self, data: &NormalizedDataset) -> CoverageReport {
        let recorded = data.recorded_dates();
        let expected_days = data.window.days();
        let missing_dates: Vec<NaiveDate> = data
            .window
            .dates()
            .filter(|d| !recorded.contains(d))
            .collect();
        let covered_days = expected_days - missing_dates.len() as u32;
        let coverage = if expected_days == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(covered_days) / Decimal::from(expected_days)).round_dp(4)
        };
        CoverageReport {
            covered_days,
            expected_days,
            coverage,
            missing_dates,
        }
    }

    /// Halt with `CoverageFailure` when the final attempt is still short
    pub fn check_coverage(&self, report: &CoverageReport, attempts: u8) -> StageResult<()> {
        if report.meets(self.rules.coverage_threshold) {
            return Ok(());
        }
        Err(Halt::new(
            Stage::Integrity,
            HaltReason::CoverageFailure {
                covered_days: report.covered_days,
                expected_days: report.expected_days,
                coverage: report.coverage,
                threshold: self.rules.coverage_threshold,
                attempts,
                missing_dates: report.missing_dates.clone(),
            },
        ))
    }

    /// Id, discipline, source and wellness checks. Outliers are recorded
    /// on the context and never alter the data.
    pub fn validate(&self, data: &NormalizedDataset, ctx: &mut AuditContext) -> StageResult<()> {
        let violation = |kind, ids: Vec<String>| {
            Err(Halt::new(
                Stage::Integrity,
                HaltReason::CompletenessViolation { kind, ids },
            ))
        };

        let duplicates = duplicate_ids(&data.events);
        if !duplicates.is_empty() {
            return violation(ViolationKind::DuplicateId, duplicates);
        }

        let unclassified: Vec<String> = data
            .events
            .iter()
            .filter(|e| e.discipline.is_none())
            .map(|e| e.id.clone())
            .collect();
        if !unclassified.is_empty() {
            return violation(ViolationKind::UnclassifiedDiscipline, unclassified);
        }

        let untrusted: Vec<String> = data
            .events
            .iter()
            .filter(|e| {
                self.rules
                    .untrusted_sources
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(e.provenance.trim()))
            })
            .map(|e| e.id.clone())
            .collect();
        if !untrusted.is_empty() {
            return violation(ViolationKind::UntrustedSource, untrusted);
        }

        let mut seen = HashSet::new();
        let repeated: Vec<String> = data
            .wellness
            .iter()
            .filter(|w| !seen.insert(w.date))
            .map(|w| w.date.to_string())
            .collect();
        if !repeated.is_empty() {
            return violation(ViolationKind::DuplicateWellness, repeated);
        }

        if data.profile.id.is_empty() {
            ctx.flag("profile has no athlete identifier");
        }
        if !data.events.is_empty() && data.events.iter().all(|e| e.provenance == crate::models::UNKNOWN_PROVENANCE) {
            ctx.flag("no event carries device provenance");
        }

        for outlier in self.outliers(&data.events) {
            tracing::info!(event = %outlier.event_id, field = %outlier.field, value = %outlier.value, "outlier flagged");
            ctx.outliers.push(outlier);
        }
        Ok(())
    }

    pub fn outliers(&self, events: &[ActivityEvent]) -> Vec<Outlier> {
        let mut found = Vec::new();
        let mut push = |event: &ActivityEvent, field: &str, value: Decimal, limit: Decimal| {
            found.push(Outlier {
                event_id: event.id.clone(),
                field: field.to_string(),
                value,
                limit,
            })
        };

        let median_load = median(events.iter().map(|e| e.load).collect());
        for event in events {
            let hours = event.hours();
            if hours > self.rules.max_duration_hours {
                push(event, "duration_hours", hours.round_dp(2), self.rules.max_duration_hours);
            }
            if let Some(intensity) = event.intensity_factor {
                if intensity > self.rules.max_intensity_factor {
                    push(event, "intensity_factor", intensity, self.rules.max_intensity_factor);
                }
            }
            if let Some(hr) = event.avg_heart_rate {
                if hr < self.rules.min_heart_rate {
                    push(event, "avg_heart_rate", hr.into(), self.rules.min_heart_rate.into());
                } else if hr > self.rules.max_heart_rate {
                    push(event, "avg_heart_rate", hr.into(), self.rules.max_heart_rate.into());
                }
            }
            if events.len() >= self.rules.load_outlier_min_events {
                if let Some(median) = median_load.filter(|m| *m > Decimal::ZERO) {
                    let limit = median * self.rules.load_outlier_factor;
                    if event.load > limit {
                        push(event, "load", event.load, limit);
                    }
                }
            }
        }
        found
    }
}

fn duplicate_ids(events: &[ActivityEvent]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for event in events {
        *counts.entry(event.id.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect()
}

fn median(mut values: Vec<Decimal>) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    values.sort();
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / Decimal::from(2)
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AthleteProfile, DateWindow, Discipline, WellnessSample};
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn event(id: &str, day: u32, load: Decimal) -> ActivityEvent {
        ActivityEvent {
            id: id.to_string(),
            date: date(day),
            start: date(day).and_hms_opt(7, 0, 0).unwrap(),
            activity_type: "Ride".into(),
            discipline: Some(Discipline::Cycling),
            duration_secs: 3600,
            distance_m: dec!(30000),
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

    fn dataset(events: Vec<ActivityEvent>, wellness_days: &[u32]) -> NormalizedDataset {
        NormalizedDataset {
            window: DateWindow::ending(date(14), 14),
            profile: AthleteProfile {
                id: "a1".into(),
                age: Some(40),
                ftp: Some(250),
                lt1_hr: None,
                lt2_hr: None,
                timezone: "UTC".into(),
                target_discipline: None,
            },
            events,
            wellness: wellness_days
                .iter()
                .map(|d| WellnessSample {
                    hrv: Some(62.0),
                    ..WellnessSample::empty(date(*d))
                })
                .collect(),
            history: Vec::new(),
            reported: None,
            planned_sessions: None,
        }
    }

    fn context() -> AuditContext {
        AuditContext::new("a1", DateWindow::ending(date(14), 14), date(14))
    }

    #[test]
    fn test_coverage_counts_activity_and_wellness_days() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);

        let events = (1..=8).map(|d| event(&format!("e{}", d), d, dec!(50))).collect();
        let data = dataset(events, &[9, 10, 11, 12]);
        let report = validator.coverage(&data);
        assert_eq!(report.expected_days, 14);
        assert_eq!(report.covered_days, 12);
        assert_eq!(report.missing_dates, vec![date(13), date(14)]);
        assert!(report.meets(dec!(0.85)));
        assert!(validator.check_coverage(&report, 1).is_ok());
    }

    #[test]
    fn test_placeholder_wellness_rows_do_not_cover_days() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);

        let events = (1..=8).map(|d| event(&format!("e{}", d), d, dec!(50))).collect();
        let mut data = dataset(events, &[9]);
        data.wellness
            .extend((10..=14).map(|d| WellnessSample::empty(date(d))));

        let report = validator.coverage(&data);
        assert_eq!(report.covered_days, 9);
        assert_eq!(report.missing_dates.len(), 5);
        assert!(!report.meets(rules.coverage_threshold));
    }

    #[test]
    fn test_coverage_shortfall_halts() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);
        let events = (1..=10).map(|d| event(&format!("e{}", d), d, dec!(50))).collect();
        let report = validator.coverage(&dataset(events, &[]));

        let halt = validator.check_coverage(&report, 2).unwrap_err();
        match halt.reason {
            HaltReason::CoverageFailure { covered_days, attempts, .. } => {
                assert_eq!(covered_days, 10);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected halt {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_halt() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);
        let data = dataset(vec![event("x", 1, dec!(40)), event("x", 2, dec!(40))], &[]);
        let halt = validator.validate(&data, &mut context()).unwrap_err();
        assert_eq!(
            halt.reason,
            HaltReason::CompletenessViolation {
                kind: ViolationKind::DuplicateId,
                ids: vec!["x".into()]
            }
        );
    }

    #[test]
    fn test_unclassified_and_untrusted_events_halt() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);

        let mut odd = event("odd", 1, dec!(10));
        odd.discipline = None;
        let halt = validator.validate(&dataset(vec![odd], &[]), &mut context()).unwrap_err();
        assert!(matches!(
            halt.reason,
            HaltReason::CompletenessViolation { kind: ViolationKind::UnclassifiedDiscipline, .. }
        ));

        let mut mocked = event("m", 1, dec!(10));
        mocked.provenance = "Mock".into();
        let halt = validator.validate(&dataset(vec![mocked], &[]), &mut context()).unwrap_err();
        assert!(matches!(
            halt.reason,
            HaltReason::CompletenessViolation { kind: ViolationKind::UntrustedSource, .. }
        ));
    }

    #[test]
    fn test_repeated_wellness_date_halts() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);
        let halt = validator
            .validate(&dataset(Vec::new(), &[3, 3]), &mut context())
            .unwrap_err();
        assert!(matches!(
            halt.reason,
            HaltReason::CompletenessViolation { kind: ViolationKind::DuplicateWellness, .. }
        ));
    }

    #[test]
    fn test_outliers_are_flagged_not_removed() {
        let rules = IntegrityRules::default();
        let validator = IntegrityValidator::new(&rules);
        let mut events: Vec<ActivityEvent> = (1..=4).map(|d| event(&format!("e{}", d), d, dec!(50))).collect();
        events[3].load = dec!(400);
        events[2].avg_heart_rate = Some(250);

        let data = dataset(events, &[]);
        let mut ctx = context();
        validator.validate(&data, &mut ctx).unwrap();

        let fields: Vec<(&str, &str)> = ctx
            .outliers
            .iter()
            .map(|o| (o.event_id.as_str(), o.field.as_str()))
            .collect();
        assert_eq!(fields, vec![("e3", "avg_heart_rate"), ("e4", "load")]);
        assert_eq!(data.events.len(), 4);
    }
}
