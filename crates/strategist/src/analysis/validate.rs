//! Optional structural checks on stage output.
//!
//! Responses are opaque text by default. With strict validation enabled the
//! orchestrator runs these checks and rejects output that breaks the format
//! each prompt asks for.

use regex::Regex;
use std::sync::LazyLock;

use super::stage::StageKind;
use super::trend::INSUFFICIENT_DATA_MESSAGE;

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent regex"));

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+\S").expect("valid list regex"));

const PERCENT_TOLERANCE: f64 = 0.5;

/// Content between `<tag>` and `</tag>`, trimmed.
#[must_use]
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// All percentages in `text`.
#[must_use]
pub fn percentages(text: &str) -> Vec<f64> {
    PERCENT
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Check a stage's output; `Err` carries the reason.
pub fn validate_output(stage: StageKind, text: &str) -> Result<(), String> {
    match stage {
        StageKind::PostType => validate_post_types(text),
        StageKind::Keywords => validate_keywords(text),
        StageKind::Sentiment => validate_sentiment(text),
        StageKind::Trend => validate_trend(text),
        StageKind::Synthesis => validate_synthesis(text),
    }
}

fn require_tag<'a>(text: &'a str, tag: &str) -> Result<&'a str, String> {
    extract_tag(text, tag).ok_or_else(|| format!("missing <{tag}> section"))
}

fn numbered_items(section: &str) -> Vec<&str> {
    section.lines().filter(|l| NUMBERED.is_match(l)).collect()
}

fn check_sum(label: &str, values: &[f64]) -> Result<(), String> {
    let sum: f64 = values.iter().sum();
    if (sum - 100.0).abs() > PERCENT_TOLERANCE {
        return Err(format!("{label} percentages sum to {sum}, expected 100"));
    }
    Ok(())
}

fn validate_post_types(text: &str) -> Result<(), String> {
    let section = require_tag(text, "post_types")?;
    let values = percentages(section);
    if values.is_empty() {
        return Err("post types carry no percentages".to_string());
    }
    if values.iter().any(|v| *v <= 0.0) {
        return Err("post types include a 0% category".to_string());
    }
    if values.windows(2).any(|w| w[0] < w[1]) {
        return Err("post types are not ranked by percentage".to_string());
    }
    check_sum("post type", &values)
}

fn validate_keywords(text: &str) -> Result<(), String> {
    for tag in ["need_phrases", "adjectives", "terminology"] {
        let section = require_tag(text, tag)?;
        let count = numbered_items(section).len();
        if count != 5 {
            return Err(format!("<{tag}> has {count} items, expected 5"));
        }
    }
    Ok(())
}

fn validate_sentiment(text: &str) -> Result<(), String> {
    let label = require_tag(text, "overall_sentiment")?.to_lowercase();
    if !matches!(label.as_str(), "positive" | "negative" | "neutral") {
        return Err(format!("unknown overall sentiment '{label}'"));
    }
    if let Some(note) = extract_tag(text, "contextual_sentiment") {
        if note.is_empty() {
            return Err("empty <contextual_sentiment> section must be omitted".to_string());
        }
    }
    Ok(())
}

fn validate_trend(text: &str) -> Result<(), String> {
    if text.trim() == INSUFFICIENT_DATA_MESSAGE {
        return Ok(());
    }
    for tag in ["topic_evolution", "user_behavior", "market_signals"] {
        require_tag(text, tag)?;
    }
    Ok(())
}

fn validate_synthesis(text: &str) -> Result<(), String> {
    require_tag(text, "strategic_summary")?;
    require_tag(text, "content_recommendations")?;

    let themes = numbered_items(require_tag(text, "content_themes")?).len();
    if themes != 3 {
        return Err(format!("<content_themes> has {themes} themes, expected 3"));
    }

    let structures = numbered_items(require_tag(text, "keyword_structures")?);
    if structures.len() != 5 {
        return Err(format!(
            "<keyword_structures> has {} variables, expected 5",
            structures.len()
        ));
    }
    for line in structures {
        let values = line
            .split_once(':')
            .map_or(0, |(_, v)| v.split('|').filter(|s| !s.trim().is_empty()).count());
        if values != 5 {
            return Err(format!(
                "keyword variable '{}' has {values} values, expected 5",
                line.trim()
            ));
        }
    }

    let brands = require_tag(text, "brand_sentiment")?;
    for line in brands.lines().filter(|l| !l.trim().is_empty()) {
        let brand = line.split(':').next().unwrap_or(line).trim();
        check_sum(&format!("brand '{brand}'"), &percentages(line))?;
    }
    Ok(())
}
