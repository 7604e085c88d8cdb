//! Prompt-chain analysis module.
//!
//! Stage definitions, the template store and the helpers that prepare stage
//! input (prompt budgeting, trend pre-check) and check stage output.

mod budget;
mod prompts;
mod stage;
mod templates;
mod trend;
mod validate;

pub use budget::{fit_to_budget, FittedData, TRUNCATION_MARKER};
pub(crate) use prompts::SYSTEM_PROMPT;
pub use stage::{StageGraph, StageKind};
pub use templates::{PromptTemplate, TemplateStore};
pub use trend::{
    assess as assess_trend_window, Granularity, TrendWindow, DEFAULT_MIN_TREND_ITEMS,
    INSUFFICIENT_DATA_MESSAGE,
};
pub use validate::{extract_tag, percentages, validate_output};
