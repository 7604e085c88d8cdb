//! Report persistence.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::assembler::{slugify, Report};

/// Paths written for one report.
#[derive(Debug, Clone)]
pub struct WrittenReport {
    /// Markdown rendering.
    pub markdown: PathBuf,
    /// Full JSON report.
    pub json: PathBuf,
}

/// Writes reports as Markdown and JSON under `<base>/<query-slug>/`.
pub struct ReportWriter {
    base_dir: PathBuf,
}

impl ReportWriter {
    /// Create a writer rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Write both renderings of a report.
    pub fn write(&self, report: &Report) -> Result<WrittenReport> {
        let dir = self.base_dir.join(slugify(&report.query));
        std::fs::create_dir_all(&dir)?;

        let stem = report.collected_at.format("%Y%m%dT%H%M%SZ").to_string();
        let markdown = dir.join(format!("{stem}.md"));
        let json = dir.join(format!("{stem}.json"));

        std::fs::write(&markdown, report.to_markdown())?;
        std::fs::write(&json, serde_json::to_string_pretty(report)?)?;

        tracing::info!(
            id = %report.id(),
            markdown = %markdown.display(),
            json = %json.display(),
            "Wrote report"
        );
        Ok(WrittenReport { markdown, json })
    }

    /// Load a previously written JSON report.
    pub fn load(path: &Path) -> Result<Report> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StageKind;
    use crate::pipeline::{StageOutput, StageStatus};
    use chrono::{TimeZone, Utc};
    use llm::TokenUsage;

    fn output(stage: StageKind) -> StageOutput {
        StageOutput {
            stage,
            text: format!("{stage} output"),
            status: StageStatus::Completed,
            attempts: 1,
            usage: TokenUsage::default(),
            posts_analyzed: 2,
            prompt_chars: 10,
            comments_dropped: 0,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().to_path_buf());
        let report = Report {
            query: "Trail Shoes".to_string(),
            collected_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap(),
            model: "m".to_string(),
            posts_analyzed: 2,
            sections: StageKind::first_tier().iter().map(|s| output(*s)).collect(),
            synthesis: output(StageKind::Synthesis),
        };

        let written = writer.write(&report).unwrap();
        assert_eq!(
            written.markdown,
            dir.path().join("trail-shoes/20240501T090000Z.md")
        );
        assert!(std::fs::read_to_string(&written.markdown)
            .unwrap()
            .contains("correlation_analysis output"));

        let loaded = ReportWriter::load(&written.json).unwrap();
        assert_eq!(loaded, report);
    }
}
