//! Audit state machine shared by every pipeline stage.
//!
//! A run moves `pending → partial → final`, or to `halted` from either of
//! the first two. Status never moves backwards. Each stage returns a
//! [`StageResult`]; a [`Halt`] carries the structured reason and the
//! offending values so the caller never has to parse log output.

use crate::error::{AuditError, Result};
use crate::models::DateWindow;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Pending,
    Partial,
    Final,
    Halted,
}

impl AuditStatus {
    pub fn can_advance_to(self, next: AuditStatus) -> bool {
        matches!(
            (self, next),
            (AuditStatus::Pending, AuditStatus::Partial)
                | (AuditStatus::Pending, AuditStatus::Halted)
                | (AuditStatus::Partial, AuditStatus::Final)
                | (AuditStatus::Partial, AuditStatus::Halted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AuditStatus::Final | AuditStatus::Halted)
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Integrity,
    Completeness,
    Totals,
    Variance,
    DerivedMetrics,
    ExtendedMetrics,
    Actions,
    Assembly,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalize => "normalize",
            Stage::Integrity => "integrity",
            Stage::Completeness => "completeness",
            Stage::Totals => "totals",
            Stage::Variance => "variance",
            Stage::DerivedMetrics => "derived_metrics",
            Stage::ExtendedMetrics => "extended_metrics",
            Stage::Actions => "actions",
            Stage::Assembly => "assembly",
        };
        f.write_str(name)
    }
}

/// Totals that are cross-checked against reported figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedField {
    Hours,
    Distance,
    Load,
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackedField::Hours => "hours",
            TrackedField::Distance => "distance",
            TrackedField::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DuplicateId,
    UnclassifiedDiscipline,
    OutsideWindow,
    DuplicateWellness,
    UntrustedSource,
}

/// Causes of the `halted` state. Exactly one per halted run.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    #[error("coverage {coverage} below {threshold} ({covered_days}/{expected_days} days) after {attempts} fetch attempt(s)")]
    CoverageFailure {
        covered_days: u32,
        expected_days: u32,
        coverage: Decimal,
        threshold: Decimal,
        attempts: u8,
        missing_dates: Vec<NaiveDate>,
    },

    #[error("{field} variance: observed {observed}, expected {expected}, allowed gap {allowed}")]
    VarianceExceeded {
        field: TrackedField,
        observed: Decimal,
        expected: Decimal,
        allowed: Decimal,
    },

    #[error("completeness violation {kind:?} on {ids:?}")]
    CompletenessViolation { kind: ViolationKind, ids: Vec<String> },

    #[error("schema mismatch, missing {missing:?}")]
    SchemaMismatch { missing: Vec<String> },
}

impl HaltReason {
    pub fn code(&self) -> &'static str {
        match self {
            HaltReason::CoverageFailure { .. } => "CoverageFailure",
            HaltReason::VarianceExceeded { .. } => "VarianceExceeded",
            HaltReason::CompletenessViolation { .. } => "CompletenessViolation",
            HaltReason::SchemaMismatch { .. } => "SchemaMismatch",
        }
    }
}

/// Terminal stage outcome
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("halted at {stage}: {reason}")]
pub struct Halt {
    pub stage: Stage,
    pub reason: HaltReason,
}

impl Halt {
    pub fn new(stage: Stage, reason: HaltReason) -> Self {
        Self { stage, reason }
    }
}

/// Either a validated stage output or the reason the run stopped
pub type StageResult<T> = std::result::Result<T, Halt>;

/// Outlier detected during integrity validation. Flag only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub event_id: String,
    pub field: String,
    pub value: Decimal,
    pub limit: Decimal,
}

/// Comparison of a computed total against an independent figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceNote {
    pub field: TrackedField,
    pub observed: Decimal,
    pub expected: Option<Decimal>,
    pub allowed: Option<Decimal>,
    pub message: String,
}

/// Same-day sessions that look like one recording logged twice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub date: NaiveDate,
    pub event_ids: Vec<String>,
    pub overlap_secs: i64,
}

/// Per-run mutable audit record. Owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditContext {
    pub run_id: Uuid,
    pub athlete_id: String,
    pub window: DateWindow,
    pub today: NaiveDate,
    status: AuditStatus,
    pub fetch_attempts: u8,
    pub completed_stages: Vec<Stage>,
    pub integrity_flags: Vec<String>,
    pub outliers: Vec<Outlier>,
    pub variance_notes: Vec<VarianceNote>,
    pub review_flags: Vec<ReviewFlag>,
}

impl AuditContext {
    pub fn new(athlete_id: impl Into<String>, window: DateWindow, today: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            athlete_id: athlete_id.into(),
            window,
            today,
            status: AuditStatus::Pending,
            fetch_attempts: 0,
            completed_stages: Vec::new(),
            integrity_flags: Vec::new(),
            outliers: Vec::new(),
            variance_notes: Vec::new(),
            review_flags: Vec::new(),
        }
    }

    pub fn status(&self) -> AuditStatus {
        self.status
    }

    pub fn advance(&mut self, next: AuditStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(AuditError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(run_id = %self.run_id, from = ?self.status, to = ?next, "audit status change");
        self.status = next;
        Ok(())
    }

    /// Record a finished stage; the first one moves the run to `partial`.
    pub fn complete_stage(&mut self, stage: Stage) -> Result<()> {
        if self.status == AuditStatus::Pending {
            self.advance(AuditStatus::Partial)?;
        }
        self.completed_stages.push(stage);
        Ok(())
    }

    pub fn halt(&mut self, halt: &Halt) -> Result<()> {
        self.advance(AuditStatus::Halted)?;
        tracing::warn!(
            run_id = %self.run_id,
            athlete = %self.athlete_id,
            stage = %halt.stage,
            reason = halt.reason.code(),
            "audit halted: {}",
            halt.reason
        );
        Ok(())
    }

    pub fn flag(&mut self, message: impl Into<String>) {
        self.integrity_flags.push(message.into());
    }
}
