//! Calculation Integrity Checker.
//!
//! Computed totals are compared with independently reported figures.
//! A gap larger than the field's allowance halts the run; totals are
//! never adjusted to match.

use crate::audit::{AuditContext, Halt, HaltReason, Stage, StageResult, TrackedField, VarianceNote};
use crate::config::{Tolerance, VarianceRules};
use crate::models::ReportedTotals;
use crate::totals::WindowAggregate;
use rust_decimal::Decimal;

pub fn check(
    aggregate: &WindowAggregate,
    reported: Option<&ReportedTotals>,
    rules: &VarianceRules,
    ctx: &mut AuditContext,
) -> StageResult<()> {
    let Some(reported) = reported else {
        ctx.variance_notes.push(VarianceNote {
            field: TrackedField::Hours,
            observed: aggregate.all.hours,
            expected: None,
            allowed: None,
            message: "no independent totals available for cross-check".to_string(),
        });
        return Ok(());
    };

    let fields: [(TrackedField, Decimal, Option<Decimal>, &Tolerance); 3] = [
        (TrackedField::Hours, aggregate.all.hours, reported.hours, &rules.hours),
        (TrackedField::Distance, aggregate.all.distance_km, reported.distance_km, &rules.distance_km),
        (TrackedField::Load, aggregate.all.load, reported.load, &rules.load),
    ];

    for (field, observed, expected, tolerance) in fields {
        let Some(expected) = expected else {
            continue;
        };
        let allowed = tolerance.allowed(expected);
        let gap = (observed - expected).abs();

        if gap > allowed {
            return Err(Halt::new(
                Stage::Variance,
                HaltReason::VarianceExceeded {
                    field,
                    observed,
                    expected,
                    allowed,
                },
            ));
        }

        ctx.variance_notes.push(VarianceNote {
            field,
            observed,
            expected: Some(expected),
            allowed: Some(allowed),
            message: format!("{} within tolerance ({:?}), gap {}", field, reported.source, gap.normalize()),
        });
    }
    Ok(())
}
