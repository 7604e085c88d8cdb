//! Reddit research to SEO content strategy.
//!
//! This crate provides:
//! - Reddit collection through the official API
//! - A fixed catalogue of prompt templates, one per analysis stage
//! - A stage orchestrator that runs four independent analyses concurrently
//!   and joins them in a synthesis stage
//! - Report assembly to Markdown and JSON
//! - An HTTP API over the whole flow

pub mod analysis;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reddit;
pub mod report;
pub mod server;

// Re-export main types
pub use analysis::{PromptTemplate, StageKind, TemplateStore};
pub use config::StrategistConfig;
pub use error::{PipelineError, PipelineResult, StageFailureCause};
pub use pipeline::{
    FailurePolicy, Orchestrator, PipelineConfig, PipelineContext, RetryPolicy, StageEvent,
    StageOutput, StageStatus,
};
pub use reddit::{CollectRequest, CollectedPost, Collector, Comment, Dataset, RedditClient};
pub use report::{Report, ReportAssembler, ReportWriter};
