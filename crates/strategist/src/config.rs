//! Strategist configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment variables.
//!
//! # Environment Variables
//! - `ANTHROPIC_API_KEY`: generation service key
//! - `STRATEGIST_MODEL`: model for every stage
//! - `STRATEGIST_TOP_POSTS`: highest-scoring posts to analyze
//! - `STRATEGIST_MAX_PROMPT_CHARS`: prompt size limit
//! - `STRATEGIST_REQUESTS_PER_MINUTE`: client-side rate limit
//! - `STRATEGIST_FAILURE_POLICY`: `abort` or `continue`
//! - `STRATEGIST_STRICT_VALIDATION`: `true` to validate stage output
//! - `STRATEGIST_API_TOKEN`: bearer token for the HTTP API
//! - `REDDIT_CLIENT_ID`, `REDDIT_CLIENT_SECRET`, `REDDIT_USER_AGENT`: Reddit app credentials

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::{FailurePolicy, PipelineConfig, RetryPolicy};
use crate::reddit::{CollectError, RedditCredentials};

/// Generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API key (usually from `ANTHROPIC_API_KEY`).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Override for the Messages API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model for every stage.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Top-k sampling cutoff.
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Max tokens per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Client-side cap on calls per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    llm::anthropic::default_model().to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.999
}

fn default_top_k() -> u32 {
    250
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_requests_per_minute() -> usize {
    llm::rate_limit::DEFAULT_REQUESTS_PER_MINUTE
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            requests_per_minute: default_requests_per_minute(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Highest-scoring posts to analyze.
    pub top_posts: usize,
    /// Max characters in a rendered prompt.
    pub max_prompt_chars: usize,
    /// Min timestamped items before the trend stage runs.
    pub min_trend_items: usize,
    /// First-tier failure handling.
    pub failure_policy: FailurePolicy,
    /// Attempts per stage call.
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    pub base_delay_ms: u64,
    /// Reject output that breaks the requested format.
    pub strict_validation: bool,
    /// Directory of `<template>.hbs` overrides.
    pub templates_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            top_posts: defaults.top_posts,
            max_prompt_chars: defaults.max_prompt_chars,
            min_trend_items: defaults.min_trend_items,
            failure_policy: defaults.failure_policy,
            max_attempts: defaults.retry.max_attempts,
            base_delay_ms: defaults.retry.base_delay.as_millis() as u64,
            strict_validation: defaults.strict_validation,
            templates_dir: None,
        }
    }
}

/// Reddit collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    /// Reddit app client ID.
    #[serde(skip_serializing)]
    pub client_id: Option<String>,
    /// Reddit app secret.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// User agent sent to Reddit.
    pub user_agent: Option<String>,
    /// Posts to collect when a request does not say.
    pub default_limit: usize,
    /// Pause between submission fetches in milliseconds.
    pub request_delay_ms: u64,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: None,
            default_limit: 20,
            request_delay_ms: 1000,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub addr: String,
    /// Bearer token required on `/api` routes; open when unset.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            api_token: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategistConfig {
    /// Directory reports are written to.
    pub output_dir: PathBuf,
    /// Generation service.
    pub llm: LlmSettings,
    /// Orchestrator.
    pub pipeline: PipelineSettings,
    /// Reddit collector.
    pub reddit: RedditSettings,
    /// HTTP API.
    pub server: ServerSettings,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            llm: LlmSettings::default(),
            pipeline: PipelineSettings::default(),
            reddit: RedditSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl StrategistConfig {
    /// Load from an optional TOML file and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("STRATEGIST_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = parse_var(&get, "STRATEGIST_REQUESTS_PER_MINUTE")? {
            self.llm.requests_per_minute = v;
        }
        if let Some(v) = parse_var(&get, "STRATEGIST_TOP_POSTS")? {
            self.pipeline.top_posts = v;
        }
        if let Some(v) = parse_var(&get, "STRATEGIST_MAX_PROMPT_CHARS")? {
            self.pipeline.max_prompt_chars = v;
        }
        if let Some(v) = parse_var(&get, "STRATEGIST_FAILURE_POLICY")? {
            self.pipeline.failure_policy = v;
        }
        if let Some(v) = parse_var(&get, "STRATEGIST_STRICT_VALIDATION")? {
            self.pipeline.strict_validation = v;
        }
        if let Some(v) = get("STRATEGIST_API_TOKEN") {
            self.server.api_token = Some(v);
        }
        if let Some(v) = get("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(v);
        }
        if let Some(v) = get("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(v);
        }
        if let Some(v) = get("REDDIT_USER_AGENT") {
            self.reddit.user_agent = Some(v);
        }
        Ok(())
    }

    /// Orchestrator configuration.
    #[must_use]
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            top_p: self.llm.top_p,
            top_k: self.llm.top_k,
            max_tokens: self.llm.max_tokens,
            stop_sequences: Vec::new(),
            top_posts: self.pipeline.top_posts,
            max_prompt_chars: self.pipeline.max_prompt_chars,
            min_trend_items: self.pipeline.min_trend_items,
            failure_policy: self.pipeline.failure_policy,
            retry: RetryPolicy {
                max_attempts: self.pipeline.max_attempts,
                base_delay: Duration::from_millis(self.pipeline.base_delay_ms),
            },
            strict_validation: self.pipeline.strict_validation,
        }
    }

    /// Reddit credentials; all three values are required.
    pub fn reddit_credentials(&self) -> Result<RedditCredentials, CollectError> {
        RedditCredentials::new(
            self.reddit.client_id.clone().unwrap_or_default(),
            self.reddit.client_secret.clone().unwrap_or_default(),
            self.reddit.user_agent.clone().unwrap_or_default(),
        )
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value '{raw}' for {name}: {e}"))
        })
        .transpose()
}
