//! Run orchestration: fetch, normalize, then stages 2 to 9 in order.
//!
//! A stage halt ends the run with a halted [`AuditResult`]. An
//! [`AuditError`] means no result was produced at all.

use crate::actions::{self, ActionInputs};
use crate::assembler::{self, AuditResult, ConfigStamp, StageOutputs};
use crate::audit::{AuditContext, Stage};
use crate::completeness;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::integrity::IntegrityValidator;
use crate::metrics::derived::DerivedMetricsEngine;
use crate::metrics::extended::ExtendedMetricsEngine;
use crate::metrics::PriorSnapshot;
use crate::models::DateWindow;
use crate::normalize::{normalize, NormalizedDataset};
use crate::totals;
use crate::upstream::{fetch_bundle, FetchRequest, UpstreamSource};
use crate::variance;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// One athlete, one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRequest {
    pub athlete_id: String,
    pub window: DateWindow,
    /// Calendar day treated as in progress
    pub today: NaiveDate,
}

impl AuditRequest {
    pub fn new(athlete_id: impl Into<String>, window: DateWindow, today: NaiveDate) -> Self {
        Self {
            athlete_id: athlete_id.into(),
            window,
            today,
        }
    }
}

/// Run-scoped cancellation flag, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            debug!(%stage, "run cancelled");
            return Err(AuditError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Independent run for [`AuditPipeline::run_batch`]
pub struct AuditJob<U> {
    pub request: AuditRequest,
    pub upstream: U,
    pub prior: PriorSnapshot,
}

/// Ends the run with a halted result when a stage halts
macro_rules! halt_on {
    ($pipeline:expr, $ctx:ident, $stage:expr) => {
        match $stage {
            Ok(value) => value,
            Err(halt) => {
                $ctx.halt(&halt)?;
                return Ok(AuditResult::halted($ctx, halt, $pipeline.stamp()));
            }
        }
    };
}

pub struct AuditPipeline {
    config: AuditConfig,
    fingerprint: String,
}

impl AuditPipeline {
    /// Validates and fingerprints the rule table once for every run.
    pub fn new(config: AuditConfig) -> Result<Self> {
        config.validate()?;
        let fingerprint = config.fingerprint()?;
        Ok(Self { config, fingerprint })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn stamp(&self) -> ConfigStamp {
        ConfigStamp {
            version: self.config.version.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    pub fn run<U: UpstreamSource + ?Sized>(
        &self,
        request: &AuditRequest,
        upstream: &mut U,
        prior: &PriorSnapshot,
    ) -> Result<AuditResult> {
        self.run_with_cancel(request, upstream, prior, &CancelToken::new())
    }

    pub fn run_with_cancel<U: UpstreamSource + ?Sized>(
        &self,
        request: &AuditRequest,
        upstream: &mut U,
        prior: &PriorSnapshot,
        cancel: &CancelToken,
    ) -> Result<AuditResult> {
        Self::check_request(request)?;
        let span = info_span!("audit", athlete = %request.athlete_id, window = %request.window);
        let _enter = span.enter();

        let mut ctx = AuditContext::new(request.athlete_id.clone(), request.window, request.today);
        info!(run_id = %ctx.run_id, "audit started");

        let fetch = FetchRequest::new(
            request.athlete_id.clone(),
            request.window,
            self.config.load.history_days,
            self.config.recovery.baseline_days,
        );
        let validator = IntegrityValidator::new(&self.config.integrity);
        let max_attempts = self.config.integrity.max_fetch_attempts.max(1);

        let data = loop {
            cancel.check(Stage::Normalize)?;
            ctx.fetch_attempts += 1;
            let bundle = fetch_bundle(upstream, &fetch)?;
            let data = normalize(request.window, bundle)?;

            let report = validator.coverage(&data);
            match validator.check_coverage(&report, ctx.fetch_attempts) {
                Ok(()) => break data,
                Err(_) if ctx.fetch_attempts < max_attempts => {
                    warn!(
                        coverage = %report.coverage,
                        attempt = ctx.fetch_attempts,
                        "coverage below threshold, fetching again"
                    );
                }
                Err(halt) => {
                    ctx.complete_stage(Stage::Normalize)?;
                    ctx.halt(&halt)?;
                    return Ok(AuditResult::halted(ctx, halt, self.stamp()));
                }
            }
        };
        ctx.complete_stage(Stage::Normalize)?;

        self.run_stages(ctx, &data, prior, cancel)
    }

    /// Stages 2 to 9 on data that is already normalized.
    pub fn run_normalized(
        &self,
        request: &AuditRequest,
        data: &NormalizedDataset,
        prior: &PriorSnapshot,
    ) -> Result<AuditResult> {
        Self::check_request(request)?;
        if data.window != request.window {
            return Err(AuditError::InvalidRequest(format!(
                "dataset window {} does not match requested window {}",
                data.window, request.window
            )));
        }

        let mut ctx = AuditContext::new(request.athlete_id.clone(), request.window, request.today);
        ctx.fetch_attempts = 1;
        let validator = IntegrityValidator::new(&self.config.integrity);
        halt_on!(self, ctx, validator.check_coverage(&validator.coverage(data), 1));
        ctx.complete_stage(Stage::Normalize)?;

        self.run_stages(ctx, data, prior, &CancelToken::new())
    }

    /// Independent runs in parallel. Results keep the job order.
    pub fn run_batch<U>(&self, jobs: Vec<AuditJob<U>>, cancel: &CancelToken) -> Vec<Result<AuditResult>>
    where
        U: UpstreamSource + Send,
    {
        info!(jobs = jobs.len(), "starting batch audit");
        jobs.into_par_iter()
            .map(|mut job| self.run_with_cancel(&job.request, &mut job.upstream, &job.prior, cancel))
            .collect()
    }

    fn check_request(request: &AuditRequest) -> Result<()> {
        if request.athlete_id.trim().is_empty() {
            return Err(AuditError::InvalidRequest("athlete id is empty".into()));
        }
        if request.window.end > request.today {
            return Err(AuditError::InvalidRequest(format!(
                "window {} ends after today ({})",
                request.window, request.today
            )));
        }
        Ok(())
    }

    fn run_stages(
        &self,
        mut ctx: AuditContext,
        data: &NormalizedDataset,
        prior: &PriorSnapshot,
        cancel: &CancelToken,
    ) -> Result<AuditResult> {
        let config = &self.config;
        let window = data.window;
        let today = ctx.today;

        cancel.check(Stage::Integrity)?;
        halt_on!(self, ctx, IntegrityValidator::new(&config.integrity).validate(data, &mut ctx));
        ctx.complete_stage(Stage::Integrity)?;

        cancel.check(Stage::Completeness)?;
        let days = halt_on!(
            self,
            ctx,
            completeness::classify(window, today, &data.events, &config.integrity, &mut ctx)
        );
        ctx.complete_stage(Stage::Completeness)?;

        cancel.check(Stage::Totals)?;
        let aggregate = totals::aggregate(window, &data.events);
        debug!(events = aggregate.all.event_count, hours = %aggregate.all.hours, load = %aggregate.all.load, "totals");
        ctx.complete_stage(Stage::Totals)?;

        cancel.check(Stage::Variance)?;
        halt_on!(
            self,
            ctx,
            variance::check(&aggregate, data.reported.as_ref(), &config.variance, &mut ctx)
        );
        ctx.complete_stage(Stage::Variance)?;

        cancel.check(Stage::DerivedMetrics)?;
        let derived = DerivedMetricsEngine::new(config).compute(data, &aggregate, prior);
        ctx.complete_stage(Stage::DerivedMetrics)?;

        cancel.check(Stage::ExtendedMetrics)?;
        let extended = ExtendedMetricsEngine::new(config).compute(data, &aggregate, &derived, prior);
        ctx.complete_stage(Stage::ExtendedMetrics)?;

        cancel.check(Stage::Actions)?;
        let actions = actions::evaluate(
            &ActionInputs {
                derived: &derived,
                extended: &extended,
            },
            &config.actions,
        );
        ctx.complete_stage(Stage::Actions)?;

        cancel.check(Stage::Assembly)?;
        assembler::assemble(
            ctx,
            self.stamp(),
            StageOutputs {
                aggregate,
                days,
                events: &data.events,
                derived,
                extended,
                actions,
            },
        )
    }
}
