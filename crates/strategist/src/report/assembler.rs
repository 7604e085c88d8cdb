//! Report assembly.
//!
//! Threads stage outputs into a report under fixed section headers. Output
//! text is embedded verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use llm::TokenUsage;

use crate::analysis::StageKind;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{StageOutput, StageStatus};
use crate::reddit::Dataset;

/// Final analysis for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Query the report answers.
    pub query: String,
    /// When the underlying data was collected.
    pub collected_at: DateTime<Utc>,
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
    /// Model used for every stage.
    pub model: String,
    /// Posts fed to the stages.
    pub posts_analyzed: usize,
    /// First-tier outputs in stage order.
    pub sections: Vec<StageOutput>,
    /// Synthesis output.
    pub synthesis: StageOutput,
}

impl Report {
    /// Identifier built from the query and collection time.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}-{}",
            slugify(&self.query),
            self.collected_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Output of a stage, synthesis included.
    #[must_use]
    pub fn section(&self, stage: StageKind) -> Option<&StageOutput> {
        if stage == StageKind::Synthesis {
            return Some(&self.synthesis);
        }
        self.sections.iter().find(|s| s.stage == stage)
    }

    /// All outputs in stage order, synthesis last.
    pub fn outputs(&self) -> impl Iterator<Item = &StageOutput> {
        self.sections.iter().chain(std::iter::once(&self.synthesis))
    }

    /// Stages replaced by placeholders.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<StageKind> {
        self.outputs()
            .filter(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage)
            .collect()
    }

    /// True when every stage produced real output.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_stages().is_empty()
    }

    /// Token usage summed over all stages.
    #[must_use]
    pub fn total_usage(&self) -> TokenUsage {
        let (input, output) = self.outputs().fold((0u32, 0u32), |(i, o), s| {
            (
                i.saturating_add(s.usage.input_tokens),
                o.saturating_add(s.usage.output_tokens),
            )
        });
        TokenUsage::new(input, output)
    }

    /// Render the report as Markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        let _ = writeln!(md, "# Reddit SEO Report: {}\n", self.query);
        let _ = writeln!(md, "- **Query**: {}", self.query);
        let _ = writeln!(md, "- **Collected**: {}", self.collected_at.to_rfc3339());
        let _ = writeln!(md, "- **Generated**: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(md, "- **Model**: {}", self.model);
        let _ = writeln!(md, "- **Posts analyzed**: {}", self.posts_analyzed);

        let failed = self.failed_stages();
        if !failed.is_empty() {
            let names: Vec<_> = failed.iter().map(|s| s.title()).collect();
            let _ = writeln!(md, "- **Incomplete**: {}", names.join(", "));
        }
        md.push('\n');

        for output in self.outputs() {
            let _ = writeln!(md, "## {}\n", output.stage.title());
            if output.status == StageStatus::Failed {
                md.push_str("_This stage failed; the text below is a placeholder._\n\n");
            }
            md.push_str(output.text.trim_end());
            md.push_str("\n\n");
        }

        md
    }
}

/// Assembles stage outputs into a [`Report`].
pub struct ReportAssembler {
    model: String,
}

impl ReportAssembler {
    /// Create an assembler stamping reports with `model`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Build a report; every stage must have an output.
    pub fn assemble(
        &self,
        dataset: &Dataset,
        query: &str,
        posts_analyzed: usize,
        mut outputs: BTreeMap<StageKind, StageOutput>,
    ) -> PipelineResult<Report> {
        let mut take = |stage: StageKind| {
            outputs.remove(&stage).ok_or_else(|| {
                PipelineError::InvalidGraph(format!("no output for stage '{stage}'"))
            })
        };

        let sections = StageKind::first_tier()
            .iter()
            .map(|stage| take(*stage))
            .collect::<PipelineResult<Vec<_>>>()?;
        let synthesis = take(StageKind::Synthesis)?;

        Ok(Report {
            query: query.to_string(),
            collected_at: dataset.collected_at,
            generated_at: Utc::now(),
            model: self.model.clone(),
            posts_analyzed,
            sections,
            synthesis,
        })
    }
}

/// Lowercase, hyphen-separated form of a query for file names.
#[must_use]
pub fn slugify(query: &str) -> String {
    let mut slug = String::new();
    for c in query.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug: String = slug.trim_end_matches('-').chars().take(60).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "query".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn output(stage: StageKind, text: &str, status: StageStatus) -> StageOutput {
        StageOutput {
            stage,
            text: text.to_string(),
            status,
            attempts: 1,
            usage: TokenUsage::new(100, 20),
            posts_analyzed: 3,
            prompt_chars: 1000,
            comments_dropped: 0,
            duration_ms: 5,
        }
    }

    fn all_outputs() -> BTreeMap<StageKind, StageOutput> {
        StageKind::all()
            .iter()
            .map(|s| (*s, output(*s, &format!("<{s}>text</{s}>"), StageStatus::Completed)))
            .collect()
    }

    fn dataset() -> Dataset {
        Dataset {
            query: "trail running shoes".to_string(),
            collected_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            posts: Vec::new(),
        }
    }

    #[test]
    fn test_assemble_orders_sections() {
        let report = ReportAssembler::new("claude-3-5-haiku-20241022")
            .assemble(&dataset(), "trail running shoes", 3, all_outputs())
            .unwrap();

        let stages: Vec<_> = report.outputs().map(|s| s.stage).collect();
        assert_eq!(stages, StageKind::all());
        assert!(report.is_complete());
        assert_eq!(report.id(), "trail-running-shoes-20240501T123000Z");
        assert_eq!(report.total_usage().total_tokens, 600);
    }

    #[test]
    fn test_missing_output_rejected() {
        let mut outputs = all_outputs();
        outputs.remove(&StageKind::Trend);

        let err = ReportAssembler::new("m")
            .assemble(&dataset(), "q", 3, outputs)
            .unwrap_err();
        assert!(err.to_string().contains("trend_analysis"));
    }

    #[test]
    fn test_markdown_embeds_text_verbatim() {
        let mut outputs = all_outputs();
        let keyword = "<need_phrases>\n1. \"a & b\" (upvotes: 3, frequency: 1)\n</need_phrases>";
        outputs.insert(
            StageKind::Keywords,
            output(StageKind::Keywords, keyword, StageStatus::Completed),
        );
        outputs.insert(
            StageKind::Sentiment,
            output(StageKind::Sentiment, "Analysis unavailable: boom", StageStatus::Failed),
        );

        let report = ReportAssembler::new("m")
            .assemble(&dataset(), "trail running shoes", 3, outputs)
            .unwrap();
        let md = report.to_markdown();

        assert!(md.contains(&format!("## Keyword Patterns\n\n{keyword}\n")));
        assert!(md.contains("- **Incomplete**: Sentiment Analysis"));
        let trend = md.find("## Trend Analysis").unwrap();
        assert!(trend < md.find("## SEO Content Strategy").unwrap());
        assert_eq!(report.failed_stages(), vec![StageKind::Sentiment]);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Best Trail Shoes?!"), "best-trail-shoes");
        assert_eq!(slugify("  --  "), "query");
        assert_eq!(slugify("café au lait"), "café-au-lait");
    }
}
