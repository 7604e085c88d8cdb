//! Prompt template store.

use handlebars::Handlebars;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::prompts::prompt_text;
use super::stage::StageKind;
use crate::error::{PipelineError, PipelineResult};

const BASE_VARIABLES: &[&str] = &["search_query", "scraped_data"];
const TREND_VARIABLES: &[&str] = &["search_query", "granularity", "scraped_data"];
const SYNTHESIS_VARIABLES: &[&str] = &[
    "search_query",
    "post_type_analysis",
    "keyword_analysis",
    "sentiment_analysis",
    "trend_analysis",
    "scraped_data",
];

/// Typed descriptor for one stage's prompt template.
#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    /// Template name (the stage's task name).
    pub name: &'static str,
    /// Stage this template drives.
    pub stage: StageKind,
    /// One-line description.
    pub description: &'static str,
    /// Placeholders that must be supplied, in declaration order.
    pub required_variables: &'static [&'static str],
}

impl PromptTemplate {
    /// Descriptor for a stage.
    #[must_use]
    pub fn for_stage(stage: StageKind) -> Self {
        let (description, required_variables) = match stage {
            StageKind::PostType => (
                "Classify posts by type and report the percentage distribution",
                BASE_VARIABLES,
            ),
            StageKind::Keywords => (
                "Extract need phrases, adjectives and terminology as exact quotes",
                BASE_VARIABLES,
            ),
            StageKind::Sentiment => (
                "Label overall sentiment and note sarcasm or subtext",
                BASE_VARIABLES,
            ),
            StageKind::Trend => (
                "Track topic, behaviour and market changes over time",
                TREND_VARIABLES,
            ),
            StageKind::Synthesis => (
                "Correlate prior analyses into an SEO content strategy",
                SYNTHESIS_VARIABLES,
            ),
        };

        Self {
            name: stage.task_name(),
            stage,
            description,
            required_variables,
        }
    }
}

/// Holds one Handlebars template per stage.
///
/// Rendering runs in strict mode with HTML escaping disabled; collected text is
/// embedded byte for byte.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    handlebars: Handlebars<'static>,
    templates: Vec<PromptTemplate>,
}

impl TemplateStore {
    /// Create a store with the built-in templates.
    pub fn new() -> PipelineResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut templates = Vec::with_capacity(StageKind::all().len());
        for stage in StageKind::all() {
            let template = PromptTemplate::for_stage(*stage);
            handlebars.register_template_string(template.name, prompt_text(*stage).assemble())?;
            templates.push(template);
        }

        Ok(Self {
            handlebars,
            templates,
        })
    }

    /// Create a store, replacing built-ins with `<name>.hbs` files found in `dir`.
    pub fn from_dir(dir: &Path) -> PipelineResult<Self> {
        let mut store = Self::new()?;

        for template in &store.templates {
            let path = dir.join(format!("{}.hbs", template.name));
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::InvalidTemplate {
                        template: template.name.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                store
                    .handlebars
                    .register_template_string(template.name, &content)?;
                tracing::info!(
                    template = template.name,
                    path = %path.display(),
                    "Loaded template override"
                );
            }
        }

        Ok(store)
    }

    /// All template descriptors in stage order.
    #[must_use]
    pub fn templates(&self) -> &[PromptTemplate] {
        &self.templates
    }

    /// Look up a template descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Render a template.
    ///
    /// Fails with `MissingVariable` naming the first declared placeholder
    /// that has no value.
    pub fn render(
        &self,
        name: &str,
        variables: &BTreeMap<String, String>,
    ) -> PipelineResult<String> {
        let template = self
            .get(name)
            .ok_or_else(|| PipelineError::UnknownTemplate(name.to_string()))?;

        if let Some(missing) = template
            .required_variables
            .iter()
            .find(|v| !variables.contains_key(**v))
        {
            return Err(PipelineError::MissingVariable {
                template: name.to_string(),
                variable: (*missing).to_string(),
            });
        }

        Ok(self.handlebars.render(name, variables)?)
    }

    /// Render a stage's template.
    pub fn render_stage(
        &self,
        stage: StageKind,
        variables: &BTreeMap<String, String>,
    ) -> PipelineResult<String> {
        self.render(stage.task_name(), variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::collections::BTreeSet;

    fn vars(stage: StageKind) -> BTreeMap<String, String> {
        PromptTemplate::for_stage(stage)
            .required_variables
            .iter()
            .map(|v| ((*v).to_string(), format!("<{v} value>")))
            .collect()
    }

    #[test]
    fn test_placeholders_match_declared_variables() {
        let placeholder = Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap();

        for stage in StageKind::all() {
            let body = prompt_text(*stage).assemble();
            let found: BTreeSet<_> = placeholder
                .captures_iter(&body)
                .map(|c| c[1].to_string())
                .collect();
            let declared: BTreeSet<_> = PromptTemplate::for_stage(*stage)
                .required_variables
                .iter()
                .map(ToString::to_string)
                .collect();
            assert_eq!(found, declared, "placeholders for {stage}");
        }
    }

    #[test]
    fn test_render_is_idempotent() {
        let store = TemplateStore::new().unwrap();
        for stage in StageKind::all() {
            let v = vars(*stage);
            let first = store.render_stage(*stage, &v).unwrap();
            let second = store.render_stage(*stage, &v).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_missing_variable_named_in_declared_order() {
        let store = TemplateStore::new().unwrap();
        let mut v = vars(StageKind::Synthesis);
        v.remove("trend_analysis");
        v.remove("keyword_analysis");

        let err = store.render_stage(StageKind::Synthesis, &v).unwrap_err();
        match err {
            PipelineError::MissingVariable { template, variable } => {
                assert_eq!(template, "correlation_analysis");
                assert_eq!(variable, "keyword_analysis");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_template() {
        let store = TemplateStore::new().unwrap();
        let err = store.render("weather_report", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTemplate(_)));
    }

    #[test]
    fn test_text_is_not_html_escaped() {
        let store = TemplateStore::new().unwrap();
        let mut v = vars(StageKind::PostType);
        v.insert("scraped_data".to_string(), r#"Title: "A & B" <3"#.to_string());

        let out = store.render_stage(StageKind::PostType, &v).unwrap();
        assert!(out.contains(r#"Title: "A & B" <3"#));
    }

    #[test]
    fn test_override_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sentiment_color_tracking.hbs"),
            "Custom {{search_query}}: {{scraped_data}}",
        )
        .unwrap();

        let store = TemplateStore::from_dir(dir.path()).unwrap();
        let out = store
            .render_stage(StageKind::Sentiment, &vars(StageKind::Sentiment))
            .unwrap();
        assert_eq!(out, "Custom <search_query value>: <scraped_data value>");
    }
}
