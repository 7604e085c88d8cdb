//! # LLM
//!
//! Text-generation boundary used by the strategist pipeline.
//!
//! This crate provides:
//! - The [`AIProvider`] trait every generation backend implements
//! - Message and option types shared by all providers
//! - An Anthropic Messages API provider
//! - A sliding-window rate limiter that wraps any provider

pub mod anthropic;
pub mod error;
pub mod provider;
pub mod rate_limit;

pub use anthropic::AnthropicProvider;
pub use error::{LlmError, LlmResult};
pub use provider::{AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions, TokenUsage};
pub use rate_limit::RateLimitedProvider;
