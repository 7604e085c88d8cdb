//! Error types for template rendering and pipeline execution.

use thiserror::Error;

use crate::analysis::StageKind;

/// Why a stage's call to the generation service failed.
#[derive(Debug, Error)]
pub enum StageFailureCause {
    /// The provider returned an error (timeout, rate limit, API error)
    #[error(transparent)]
    Provider(#[from] llm::LlmError),

    /// The provider answered with no text
    #[error("generation service returned an empty response")]
    EmptyResponse,
}

/// Errors produced while rendering templates or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No template registered under this name
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// A declared placeholder had no value at render time
    #[error("template '{template}' is missing required variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    /// Template source failed to parse
    #[error("template syntax error: {0}")]
    TemplateSyntax(#[from] Box<handlebars::TemplateError>),

    /// Template override could not be read
    #[error("cannot load template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Template engine failed while rendering
    #[error("template render error: {0}")]
    Render(#[from] Box<handlebars::RenderError>),

    /// A stage was invoked before one of its inputs was produced
    #[error("stage '{stage}' cannot run before '{dependency}' has produced output")]
    UnmetDependency {
        stage: StageKind,
        dependency: StageKind,
    },

    /// The generation-service call for a stage failed
    #[error("stage '{stage}' failed after {attempts} attempt(s): {cause}")]
    StageFailure {
        stage: StageKind,
        attempts: u32,
        #[source]
        cause: StageFailureCause,
    },

    /// Strict validation rejected a stage's output
    #[error("stage '{stage}' returned malformed output: {reason}")]
    MalformedOutput { stage: StageKind, reason: String },

    /// The configured model is not served by the provider
    #[error("model '{model}' is not supported by provider '{provider}'")]
    UnsupportedModel { model: String, provider: String },

    /// The stage graph is not a DAG with a single terminal node
    #[error("invalid stage graph: {0}")]
    InvalidGraph(String),

    /// The run was cancelled before completion
    #[error("pipeline cancelled")]
    Cancelled,

    /// The collected dataset has no posts to analyze
    #[error("dataset for query '{0}' contains no posts")]
    EmptyDataset(String),
}

impl PipelineError {
    /// The stage this error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            PipelineError::StageFailure { stage, .. }
            | PipelineError::MalformedOutput { stage, .. }
            | PipelineError::UnmetDependency { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<handlebars::TemplateError> for PipelineError {
    fn from(err: handlebars::TemplateError) -> Self {
        PipelineError::TemplateSyntax(Box::new(err))
    }
}

impl From<handlebars::RenderError> for PipelineError {
    fn from(err: handlebars::RenderError) -> Self {
        PipelineError::Render(Box::new(err))
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_names_stage() {
        let err = PipelineError::StageFailure {
            stage: StageKind::Sentiment,
            attempts: 3,
            cause: StageFailureCause::EmptyResponse,
        };
        assert_eq!(err.stage(), Some(StageKind::Sentiment));
        assert_eq!(
            err.to_string(),
            "stage 'sentiment_color_tracking' failed after 3 attempt(s): \
             generation service returned an empty response"
        );
    }

    #[test]
    fn test_missing_variable_message() {
        let err = PipelineError::MissingVariable {
            template: "trend_analysis".to_string(),
            variable: "scraped_data".to_string(),
        };
        assert!(err.stage().is_none());
        assert!(err.to_string().contains("'scraped_data'"));
    }
}
