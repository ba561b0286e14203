//! Adaptive Action Evaluator.
//!
//! An ordered table of pure predicates over the finished metric set.
//! Rules fire in table order and the output is capped, so which actions
//! survive the cap depends on priority only, never on magnitude.

use crate::config::{ActionRules, BandLevel, ACTION_CAP};
use crate::metrics::derived::DerivedMetrics;
use crate::metrics::extended::{ExtendedMetrics, TrainingPhase};
use crate::metrics::MetricKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveAction {
    pub rule: String,
    /// 1 is highest
    pub priority: u8,
    pub text: String,
    pub metrics: Vec<MetricKey>,
}

/// Everything a rule may look at
pub struct ActionInputs<'a> {
    pub derived: &'a DerivedMetrics,
    pub extended: &'a ExtendedMetrics,
}

impl ActionInputs<'_> {
    fn value(&self, key: MetricKey) -> Option<f64> {
        self.derived
            .set
            .value(key)
            .or_else(|| self.extended.set.value(key))
    }

    fn level(&self, key: MetricKey) -> Option<BandLevel> {
        self.derived
            .set
            .level(key)
            .or_else(|| self.extended.set.level(key))
    }

    fn below(&self, key: MetricKey, limit: f64) -> bool {
        self.value(key).map_or(false, |v| v < limit)
    }

    fn above(&self, key: MetricKey, limit: f64) -> bool {
        self.value(key).map_or(false, |v| v > limit)
    }
}

struct ActionRule {
    id: &'static str,
    metrics: &'static [MetricKey],
    text: &'static str,
    applies: fn(&ActionInputs, &ActionRules) -> bool,
}

const RULES: &[ActionRule] = &[
    ActionRule {
        id: "deload",
        metrics: &[MetricKey::Acwr, MetricKey::Monotony],
        text: "Schedule a deload: cut volume 30-40% for the next 3-4 days",
        applies: |m, r| m.above(MetricKey::Acwr, r.deload_acwr) && m.above(MetricKey::Monotony, r.deload_monotony),
    },
    ActionRule {
        id: "block_intensity",
        metrics: &[MetricKey::RecoveryIndex],
        text: "Hold high-intensity sessions until HRV and resting HR return to baseline",
        applies: |m, r| m.below(MetricKey::RecoveryIndex, r.block_intensity_recovery),
    },
    ActionRule {
        id: "reduce_strain",
        metrics: &[MetricKey::Strain],
        text: "Reduce weekly strain: replace one hard day with an easy aerobic day",
        applies: |m, _| m.level(MetricKey::Strain) == Some(BandLevel::Red),
    },
    ActionRule {
        id: "add_zone2",
        metrics: &[MetricKey::Zone2Share],
        text: "Add a long low-intensity Z2 session this week",
        applies: |m, r| m.below(MetricKey::Zone2Share, r.min_zone2_pct),
    },
    ActionRule {
        id: "vary_load",
        metrics: &[MetricKey::Monotony],
        text: "Vary daily load: alternate hard and easy days",
        applies: |m, r| m.above(MetricKey::Monotony, r.high_monotony),
    },
    ActionRule {
        id: "inconsistency",
        metrics: &[MetricKey::RollingSessionCount],
        text: "Training has been inconsistent over 21 days: rebuild routine with short regular sessions",
        applies: |m, r| m.below(MetricKey::RollingSessionCount, f64::from(r.min_rolling_sessions)),
    },
    ActionRule {
        id: "quality_balance",
        metrics: &[],
        text: "Include one long endurance session and one interval session each week",
        applies: |m, _| !m.extended.quality.met,
    },
    ActionRule {
        id: "durability",
        metrics: &[MetricKey::DurabilityIndex],
        text: "Build durability: extend long sessions with steady work in the final hour",
        applies: |m, _| m.level(MetricKey::DurabilityIndex) == Some(BandLevel::Red),
    },
    ActionRule {
        id: "polarisation",
        metrics: &[MetricKey::PolarisationIndex],
        text: "Too much time at moderate-to-hard intensity: shift volume back to Z1-Z2",
        applies: |m, r| m.below(MetricKey::PolarisationIndex, r.min_polarisation_index),
    },
    ActionRule {
        id: "consistency",
        metrics: &[MetricKey::ConsistencyIndex],
        text: "Completed sessions fall short of plan: trim the plan or protect training time",
        applies: |m, r| m.below(MetricKey::ConsistencyIndex, r.min_consistency),
    },
    ActionRule {
        id: "benchmark_regression",
        metrics: &[MetricKey::BenchmarkIndex],
        text: "Threshold power regressed at re-test: review recovery before adding load",
        applies: |m, r| m.value(MetricKey::BenchmarkIndex).map_or(false, |v| v <= r.regression_benchmark),
    },
    ActionRule {
        id: "overload_phase",
        metrics: &[MetricKey::FatigueTrend, MetricKey::Acwr],
        text: "Load is climbing faster than fitness: cap next week's volume at this week's level",
        applies: |m, _| m.extended.phase.phase == TrainingPhase::Overload,
    },
];

/// Evaluate the rule table in priority order, keeping at most
/// `rules.max_actions` actions and never more than `ACTION_CAP`.
pub fn evaluate(inputs: &ActionInputs, rules: &ActionRules) -> Vec<AdaptiveAction> {
    let actions: Vec<AdaptiveAction> = RULES
        .iter()
        .enumerate()
        .filter(|(_, rule)| (rule.applies)(inputs, rules))
        .take(rules.max_actions.min(ACTION_CAP))
        .map(|(index, rule)| AdaptiveAction {
            rule: rule.id.to_string(),
            priority: (index + 1) as u8,
            text: rule.text.to_string(),
            metrics: rule.metrics.to_vec(),
        })
        .collect();

    tracing::debug!(count = actions.len(), "adaptive actions evaluated");
    actions
}

/// Ids of every rule in priority order
pub fn rule_ids() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::LoadSnapshot;
    use crate::metrics::extended::{PhaseAssessment, QualityBalance};
    use crate::metrics::{DerivedMetricSet, PriorSnapshot};
    use crate::zones::ZoneDistribution;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn inputs(values: &[(MetricKey, f64)], quality_met: bool) -> (DerivedMetrics, ExtendedMetrics) {
        let prior = PriorSnapshot::default();
        let mut set = DerivedMetricSet::default();
        for (key, value) in values {
            set.record(*key, *value, None, &prior);
        }
        let derived = DerivedMetrics {
            set,
            load: LoadSnapshot {
                date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                acute: Decimal::ZERO,
                chronic: Decimal::ZERO,
                fitness: Decimal::ZERO,
                balance: Decimal::ZERO,
                acwr: None,
                fatigue_trend_pct: None,
                fitness_ramp: None,
                acute_ramp: None,
                recent_daily_loads: Vec::new(),
                rolling_sessions: 0,
            },
            zones: ZoneDistribution::default(),
            recovery: None,
        };
        let extended = ExtendedMetrics {
            set: DerivedMetricSet::default(),
            age_adjustment: None,
            phase: PhaseAssessment {
                phase: TrainingPhase::Consolidation,
                load_trend_pct: None,
                hrv_rebound_pct: None,
            },
            quality: QualityBalance {
                long_sessions: 1,
                interval_sessions: 1,
                target: 2,
                met: quality_met,
            },
        };
        (derived, extended)
    }

    fn ids(actions: &[AdaptiveAction]) -> Vec<&str> {
        actions.iter().map(|a| a.rule.as_str()).collect()
    }

    #[test]
    fn test_deload_needs_both_conditions() {
        let rules = ActionRules::default();
        let (d, e) = inputs(&[(MetricKey::Acwr, 1.6), (MetricKey::Monotony, 1.7), (MetricKey::RollingSessionCount, 10.0)], true);
        let actions = evaluate(&ActionInputs { derived: &d, extended: &e }, &rules);
        assert_eq!(ids(&actions), vec!["deload"]);
        assert_eq!(actions[0].metrics, vec![MetricKey::Acwr, MetricKey::Monotony]);

        let (d, e) = inputs(&[(MetricKey::Acwr, 1.6), (MetricKey::Monotony, 1.5), (MetricKey::RollingSessionCount, 10.0)], true);
        assert!(evaluate(&ActionInputs { derived: &d, extended: &e }, &rules).is_empty());
    }

    #[test]
    fn test_cap_keeps_highest_priority() {
        let rules = ActionRules::default();
        let (d, e) = inputs(
            &[
                (MetricKey::Acwr, 1.7),
                (MetricKey::Monotony, 2.4),
                (MetricKey::RecoveryIndex, 0.7),
                (MetricKey::Zone2Share, 5.0),
                (MetricKey::RollingSessionCount, 2.0),
                (MetricKey::PolarisationIndex, 0.4),
            ],
            false,
        );
        let actions = evaluate(&ActionInputs { derived: &d, extended: &e }, &rules);
        assert_eq!(actions.len(), 5);
        assert_eq!(
            ids(&actions),
            vec!["deload", "block_intensity", "add_zone2", "vary_load", "inconsistency"]
        );
        assert!(actions.windows(2).all(|w| w[0].priority < w[1].priority));
    }

    #[test]
    fn test_unvalidated_rules_cannot_exceed_cap() {
        let rules = ActionRules {
            max_actions: 12,
            ..ActionRules::default()
        };
        let (d, e) = inputs(
            &[
                (MetricKey::Acwr, 1.7),
                (MetricKey::Monotony, 2.4),
                (MetricKey::RecoveryIndex, 0.7),
                (MetricKey::Zone2Share, 5.0),
                (MetricKey::RollingSessionCount, 2.0),
                (MetricKey::PolarisationIndex, 0.4),
            ],
            false,
        );
        let actions = evaluate(&ActionInputs { derived: &d, extended: &e }, &rules);
        assert_eq!(actions.len(), ACTION_CAP);
    }

    #[test]
    fn test_withheld_metrics_never_trigger() {
        let rules = ActionRules::default();
        let (mut d, e) = inputs(&[(MetricKey::RollingSessionCount, 8.0)], true);
        d.set.withhold(MetricKey::RecoveryIndex, "no wellness");
        d.set.withhold(MetricKey::Zone2Share, "no zone data");
        assert!(evaluate(&ActionInputs { derived: &d, extended: &e }, &rules).is_empty());
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let mut all: Vec<&str> = rule_ids().collect();
        let count = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), count);
    }
}
