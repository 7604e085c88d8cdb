//! Stage orchestrator - runs the prompt chain for one query.
//!
//! The four first-tier stages run concurrently against the same read-only post
//! snapshot; synthesis waits for all of them and receives their text verbatim.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use llm::{AIMessage, AIProvider, AIResponse, GenerateOptions, LlmError, TokenUsage};

use crate::analysis::{
    assess_trend_window, fit_to_budget, validate_output, StageGraph, StageKind, TemplateStore,
    TrendWindow, DEFAULT_MIN_TREND_ITEMS, INSUFFICIENT_DATA_MESSAGE, SYSTEM_PROMPT,
};
use crate::error::{PipelineError, PipelineResult, StageFailureCause};
use crate::reddit::{CollectedPost, Dataset};
use crate::report::{Report, ReportAssembler};

/// What to do when a first-tier stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole run with the stage's error.
    #[default]
    Abort,
    /// Record a placeholder for the stage and let synthesis run.
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!("unknown failure policy '{other}' (expected abort or continue)")),
        }
    }
}

/// Retry settings for generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per stage, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Configuration for the stage orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model used for every stage.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Max tokens per response.
    pub max_tokens: u32,
    /// Stop sequences.
    pub stop_sequences: Vec<String>,
    /// Highest-scoring posts to analyze.
    pub top_posts: usize,
    /// Max characters in a rendered prompt.
    pub max_prompt_chars: usize,
    /// Min timestamped items before the trend stage runs.
    pub min_trend_items: usize,
    /// First-tier failure handling.
    pub failure_policy: FailurePolicy,
    /// Retry settings.
    pub retry: RetryPolicy,
    /// Reject stage output that breaks the requested format.
    pub strict_validation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: llm::anthropic::default_model().to_string(),
            temperature: 0.3,
            top_p: 0.999,
            top_k: 250,
            max_tokens: 4096,
            stop_sequences: Vec::new(),
            top_posts: 10,
            max_prompt_chars: 400_000,
            min_trend_items: DEFAULT_MIN_TREND_ITEMS,
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
            strict_validation: false,
        }
    }
}

/// How a stage produced its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Generated by the service.
    Completed,
    /// Answered locally without a service call.
    ShortCircuited,
    /// Failed; text is a placeholder (continue policy only).
    Failed,
}

/// Output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Stage that produced this output.
    pub stage: StageKind,
    /// Response text, unmodified.
    pub text: String,
    /// How the text was produced.
    pub status: StageStatus,
    /// Service calls made.
    pub attempts: u32,
    /// Token usage of the successful call.
    #[serde(default)]
    pub usage: TokenUsage,
    /// Posts included in the prompt.
    pub posts_analyzed: usize,
    /// Rendered prompt size in characters.
    pub prompt_chars: usize,
    /// Comments left out to fit the prompt budget.
    #[serde(default)]
    pub comments_dropped: usize,
    /// Wall time for the stage.
    pub duration_ms: u64,
}

impl StageOutput {
    fn placeholder(stage: StageKind, error: &PipelineError, posts_analyzed: usize) -> Self {
        Self {
            stage,
            text: format!("Analysis unavailable: {error}"),
            status: StageStatus::Failed,
            attempts: match error {
                PipelineError::StageFailure { attempts, .. } => *attempts,
                _ => 0,
            },
            usage: TokenUsage::default(),
            posts_analyzed,
            prompt_chars: 0,
            comments_dropped: 0,
            duration_ms: 0,
        }
    }
}

/// Progress notifications published while a pipeline runs.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A stage began.
    Started { stage: StageKind },
    /// A call failed and will be retried after `delay`.
    Retrying {
        stage: StageKind,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// A stage produced output.
    Completed {
        stage: StageKind,
        status: StageStatus,
        duration: Duration,
    },
    /// A stage failed.
    Failed { stage: StageKind, error: String },
}

/// Per-run state shared by every stage: the generation client, the read-only
/// post snapshot, the query and the cancellation signal.
#[derive(Clone)]
pub struct PipelineContext {
    provider: Arc<dyn AIProvider>,
    dataset: Arc<Dataset>,
    posts: Arc<[CollectedPost]>,
    query: String,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<StageEvent>>,
}

impl PipelineContext {
    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress events on `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<StageEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Query being analyzed.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Posts the stages analyze.
    #[must_use]
    pub fn posts(&self) -> &[CollectedPost] {
        &self.posts
    }

    /// Token that cancels this run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Runs the stage graph.
pub struct Orchestrator {
    config: PipelineConfig,
    provider: Arc<dyn AIProvider>,
    templates: Arc<TemplateStore>,
    graph: StageGraph,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in templates.
    pub fn new(config: PipelineConfig, provider: Arc<dyn AIProvider>) -> PipelineResult<Self> {
        Self::with_templates(config, provider, TemplateStore::new()?)
    }

    /// Create an orchestrator with a custom template store.
    pub fn with_templates(
        config: PipelineConfig,
        provider: Arc<dyn AIProvider>,
        templates: TemplateStore,
    ) -> PipelineResult<Self> {
        if !provider.supports_model(&config.model) {
            return Err(PipelineError::UnsupportedModel {
                model: config.model,
                provider: provider.name().to_string(),
            });
        }
        let graph = StageGraph::standard();
        graph.validate()?;
        Ok(Self {
            config,
            provider,
            templates: Arc::new(templates),
            graph,
        })
    }

    /// Orchestrator configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Template store.
    #[must_use]
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Build a run context over the dataset's top posts.
    #[must_use]
    pub fn context(&self, dataset: Arc<Dataset>, query: impl Into<String>) -> PipelineContext {
        let posts: Arc<[CollectedPost]> = dataset.top_posts(self.config.top_posts).into();
        PipelineContext {
            provider: self.provider.clone(),
            dataset,
            posts,
            query: query.into(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Run the full pipeline for a query.
    pub async fn run_pipeline(&self, dataset: Dataset, query: &str) -> PipelineResult<Report> {
        let ctx = self.context(Arc::new(dataset), query);
        self.execute(&ctx).await
    }

    /// Run the full pipeline with a prepared context.
    ///
    /// Cancelling the context's token aborts pending service calls and
    /// discards partial output.
    pub async fn execute(&self, ctx: &PipelineContext) -> PipelineResult<Report> {
        if ctx.posts.is_empty() {
            return Err(PipelineError::EmptyDataset(ctx.query.clone()));
        }

        let terminal = self.graph.terminal()?;
        let started = Instant::now();
        tracing::info!(
            query = %ctx.query,
            posts = ctx.posts.len(),
            comments = ctx.posts.iter().map(|p| p.comments.len()).sum::<usize>(),
            model = %self.config.model,
            "Starting analysis pipeline"
        );

        let mut outputs: BTreeMap<StageKind, StageOutput> = BTreeMap::new();

        for layer in self.graph.layers()? {
            let mut finished = Vec::with_capacity(layer.len());
            {
                let upstream = &outputs;
                let mut pending: FuturesUnordered<_> = layer
                    .iter()
                    .map(|stage| async move {
                        (*stage, self.run_stage(ctx, *stage, upstream).await)
                    })
                    .collect();

                loop {
                    let next = tokio::select! {
                        () = ctx.cancel.cancelled() => {
                            tracing::warn!(query = %ctx.query, "Pipeline cancelled");
                            return Err(PipelineError::Cancelled);
                        }
                        next = pending.next() => next,
                    };
                    let Some((stage, result)) = next else {
                        break;
                    };

                    match result {
                        Ok(output) => finished.push(output),
                        Err(e) if self.may_continue(stage, terminal, &e) => {
                            tracing::warn!(
                                stage = %stage,
                                error = %e,
                                "Stage failed, continuing without it"
                            );
                            finished.push(StageOutput::placeholder(stage, &e, ctx.posts.len()));
                        }
                        // Dropping `pending` aborts the other in-flight calls.
                        Err(e) => return Err(e),
                    }
                }
            }
            for output in finished {
                outputs.insert(output.stage, output);
            }
        }

        tracing::info!(
            query = %ctx.query,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis pipeline finished"
        );

        ReportAssembler::new(&self.config.model).assemble(
            &ctx.dataset,
            &ctx.query,
            ctx.posts.len(),
            outputs,
        )
    }

    fn may_continue(&self, stage: StageKind, terminal: StageKind, error: &PipelineError) -> bool {
        self.config.failure_policy == FailurePolicy::Continue
            && stage != terminal
            && matches!(
                error,
                PipelineError::StageFailure { .. } | PipelineError::MalformedOutput { .. }
            )
    }

    /// Run one stage: render its template with the collected data and any
    /// upstream outputs, call the generation service, return the text.
    pub async fn run_stage(
        &self,
        ctx: &PipelineContext,
        stage: StageKind,
        upstream: &BTreeMap<StageKind, StageOutput>,
    ) -> PipelineResult<StageOutput> {
        ctx.emit(StageEvent::Started { stage });
        let started = Instant::now();

        match self.stage_inner(ctx, stage, upstream, started).await {
            Ok(output) => {
                ctx.emit(StageEvent::Completed {
                    stage,
                    status: output.status,
                    duration: started.elapsed(),
                });
                Ok(output)
            }
            Err(e) => {
                ctx.emit(StageEvent::Failed {
                    stage,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stage_inner(
        &self,
        ctx: &PipelineContext,
        stage: StageKind,
        upstream: &BTreeMap<StageKind, StageOutput>,
        started: Instant,
    ) -> PipelineResult<StageOutput> {
        let mut variables = BTreeMap::new();
        variables.insert("search_query".to_string(), ctx.query.clone());

        for dependency in self.graph.dependencies(stage) {
            let output = upstream
                .get(&dependency)
                .ok_or(PipelineError::UnmetDependency { stage, dependency })?;
            variables.insert(dependency.output_variable().to_string(), output.text.clone());
        }

        if stage == StageKind::Trend {
            match assess_trend_window(&ctx.posts, self.config.min_trend_items) {
                TrendWindow::Insufficient { items, span } => {
                    tracing::info!(
                        stage = %stage,
                        items,
                        span_minutes = span.num_minutes(),
                        "Not enough data for trend analysis, skipping service call"
                    );
                    return Ok(StageOutput {
                        stage,
                        text: INSUFFICIENT_DATA_MESSAGE.to_string(),
                        status: StageStatus::ShortCircuited,
                        attempts: 0,
                        usage: TokenUsage::default(),
                        posts_analyzed: ctx.posts.len(),
                        prompt_chars: 0,
                        comments_dropped: 0,
                        duration_ms: elapsed_ms(started),
                    });
                }
                TrendWindow::Sufficient { granularity, .. } => {
                    variables.insert("granularity".to_string(), granularity.to_string());
                }
            }
        }

        // Budget what is left after the fixed prompt text and upstream outputs.
        variables.insert("scraped_data".to_string(), String::new());
        let overhead = self.templates.render_stage(stage, &variables)?.chars().count();
        let fitted = fit_to_budget(
            &ctx.posts,
            self.config.max_prompt_chars.saturating_sub(overhead),
        );
        variables.insert("scraped_data".to_string(), fitted.text);
        let prompt = self.templates.render_stage(stage, &variables)?;
        let prompt_chars = prompt.chars().count();

        tracing::info!(
            stage = %stage,
            prompt_chars,
            comments_dropped = fitted.comments_dropped,
            posts_truncated = fitted.posts_truncated,
            "Running stage"
        );

        let messages = vec![AIMessage::system(SYSTEM_PROMPT), AIMessage::user(prompt)];
        let options = self.generate_options(ctx, stage);
        let (response, attempts) = self.call_with_retry(ctx, stage, &messages, &options).await?;

        if self.config.strict_validation {
            validate_output(stage, &response.text)
                .map_err(|reason| PipelineError::MalformedOutput { stage, reason })?;
        }

        tracing::info!(
            stage = %stage,
            attempts,
            output_tokens = response.usage.output_tokens,
            "Stage completed"
        );

        Ok(StageOutput {
            stage,
            text: response.text,
            status: StageStatus::Completed,
            attempts,
            usage: response.usage,
            posts_analyzed: ctx.posts.len(),
            prompt_chars,
            comments_dropped: fitted.comments_dropped,
            duration_ms: elapsed_ms(started),
        })
    }

    fn generate_options(&self, ctx: &PipelineContext, stage: StageKind) -> GenerateOptions {
        GenerateOptions {
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            top_k: Some(self.config.top_k),
            max_tokens: Some(self.config.max_tokens),
            stop_sequences: (!self.config.stop_sequences.is_empty())
                .then(|| self.config.stop_sequences.clone()),
            ..Default::default()
        }
        .with_metadata("search_query", ctx.query.clone())
        .with_metadata("stage", stage.task_name())
    }

    async fn call_with_retry(
        &self,
        ctx: &PipelineContext,
        stage: StageKind,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> PipelineResult<(AIResponse, u32)> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                () = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled),
                r = ctx.provider.generate_text(&self.config.model, messages, options) => r,
            };

            let cause = match result {
                Ok(response) if !response.text.trim().is_empty() => return Ok((response, attempt)),
                Ok(_) => StageFailureCause::EmptyResponse,
                Err(e) => StageFailureCause::Provider(e),
            };

            let retryable = match &cause {
                StageFailureCause::Provider(e) => e.is_retryable(),
                StageFailureCause::EmptyResponse => true,
            };
            if !retryable || attempt >= max_attempts {
                tracing::error!(stage = %stage, attempt, error = %cause, "Stage call failed");
                return Err(PipelineError::StageFailure {
                    stage,
                    attempts: attempt,
                    cause,
                });
            }

            let mut delay = self.config.retry.delay_for(attempt);
            if let StageFailureCause::Provider(LlmError::RateLimited { retry_after_secs }) =
                &cause
            {
                delay = delay.max(Duration::from_secs(*retry_after_secs));
            }

            tracing::warn!(
                stage = %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "Stage call failed, retrying"
            );
            ctx.emit(StageEvent::Retrying {
                stage,
                attempt,
                delay,
                error: cause.to_string(),
            });

            tokio::select! {
                () = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("Continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert!("retry".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default().to_string(), "abort");
    }

    #[test]
    fn test_default_sampling_matches_deployment() {
        let config = PipelineConfig::default();
        assert_eq!(config.model, "claude-3-5-haiku-20241022");
        assert_eq!(config.top_k, 250);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.top_posts, 10);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert!(!config.strict_validation);
    }
}
