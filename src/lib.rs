// Library interface for TrainAudit
// The binary and the integration tests both go through these modules

pub mod actions;
pub mod assembler;
pub mod audit;
pub mod completeness;
pub mod config;
pub mod error;
pub mod integrity;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod render;
pub mod totals;
pub mod upstream;
pub mod variance;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use actions::AdaptiveAction;
pub use assembler::{AuditResult, ConfigStamp, EventLogEntry};
pub use audit::{AuditContext, AuditStatus, Halt, HaltReason, Stage, StageResult};
pub use config::AuditConfig;
pub use error::{AuditError, Result};
pub use logging::{LogConfig, LogFormat};
pub use metrics::{DerivedMetricSet, MetricKey, MetricReading, PriorSnapshot};
pub use pipeline::{AuditJob, AuditPipeline, AuditRequest, CancelToken};
pub use upstream::{PayloadSource, UpstreamPayload, UpstreamSource};
