//! Analysis stages and their dependency graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, PipelineResult};

/// One LLM-backed analysis task.
///
/// Declaration order is the report's section order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Post-type classification.
    PostType,
    /// Keyword and language-feature extraction.
    Keywords,
    /// Sentiment tracking.
    Sentiment,
    /// Trend analysis.
    Trend,
    /// Correlation and strategy synthesis.
    Synthesis,
}

impl StageKind {
    /// All stages in report order.
    #[must_use]
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::PostType,
            StageKind::Keywords,
            StageKind::Sentiment,
            StageKind::Trend,
            StageKind::Synthesis,
        ]
    }

    /// The four independent stages that consume only collected data.
    #[must_use]
    pub fn first_tier() -> &'static [StageKind] {
        &[
            StageKind::PostType,
            StageKind::Keywords,
            StageKind::Sentiment,
            StageKind::Trend,
        ]
    }

    /// Task name, also the template name.
    #[must_use]
    pub fn task_name(self) -> &'static str {
        match self {
            StageKind::PostType => "title_and_post_text_analysis",
            StageKind::Keywords => "language_feature_extraction",
            StageKind::Sentiment => "sentiment_color_tracking",
            StageKind::Trend => "trend_analysis",
            StageKind::Synthesis => "correlation_analysis",
        }
    }

    /// Section header used in reports.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            StageKind::PostType => "Post Type Analysis",
            StageKind::Keywords => "Keyword Patterns",
            StageKind::Sentiment => "Sentiment Analysis",
            StageKind::Trend => "Trend Analysis",
            StageKind::Synthesis => "SEO Content Strategy",
        }
    }

    /// Stages whose output this stage consumes.
    #[must_use]
    pub fn depends_on(self) -> &'static [StageKind] {
        match self {
            StageKind::Synthesis => Self::first_tier(),
            _ => &[],
        }
    }

    /// Template variable under which this stage's output is passed downstream.
    #[must_use]
    pub fn output_variable(self) -> &'static str {
        match self {
            StageKind::PostType => "post_type_analysis",
            StageKind::Keywords => "keyword_analysis",
            StageKind::Sentiment => "sentiment_analysis",
            StageKind::Trend => "trend_analysis",
            StageKind::Synthesis => "strategy",
        }
    }
}

/// Accepts a task name or a short alias.
impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "title_and_post_text_analysis" | "post_type" | "post-type" => Ok(StageKind::PostType),
            "language_feature_extraction" | "keywords" | "keyword" => Ok(StageKind::Keywords),
            "sentiment_color_tracking" | "sentiment" => Ok(StageKind::Sentiment),
            "trend_analysis" | "trend" => Ok(StageKind::Trend),
            "correlation_analysis" | "synthesis" => Ok(StageKind::Synthesis),
            other => Err(format!(
                "unknown stage '{other}' (try post_type, keywords, sentiment, trend, synthesis)"
            )),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task_name())
    }
}

/// Dependency graph over stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    edges: BTreeMap<StageKind, BTreeSet<StageKind>>,
}

impl StageGraph {
    /// Build a graph from explicit dependencies.
    #[must_use]
    pub fn new(edges: BTreeMap<StageKind, BTreeSet<StageKind>>) -> Self {
        Self { edges }
    }

    /// The standard graph: four independent stages joined by synthesis.
    #[must_use]
    pub fn standard() -> Self {
        let edges = StageKind::all()
            .iter()
            .map(|s| (*s, s.depends_on().iter().copied().collect()))
            .collect();
        Self { edges }
    }

    /// Dependencies of a stage.
    pub fn dependencies(&self, stage: StageKind) -> impl Iterator<Item = StageKind> + '_ {
        self.edges.get(&stage).into_iter().flatten().copied()
    }

    /// The single stage nothing depends on.
    pub fn terminal(&self) -> PipelineResult<StageKind> {
        let depended: BTreeSet<_> = self.edges.values().flatten().copied().collect();
        let terminals: Vec<_> = self
            .edges
            .keys()
            .filter(|s| !depended.contains(*s))
            .copied()
            .collect();

        match terminals.as_slice() {
            [one] => Ok(*one),
            [] => Err(PipelineError::InvalidGraph("no terminal stage".to_string())),
            many => Err(PipelineError::InvalidGraph(format!(
                "multiple terminal stages: {}",
                many.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Check the graph is a DAG whose single terminal depends on every other stage.
    pub fn validate(&self) -> PipelineResult<()> {
        for (stage, deps) in &self.edges {
            if let Some(missing) = deps.iter().find(|d| !self.edges.contains_key(*d)) {
                return Err(PipelineError::InvalidGraph(format!(
                    "stage '{stage}' depends on unregistered stage '{missing}'"
                )));
            }
        }

        let layers = self.layers()?;
        let terminal = self.terminal()?;
        if layers.last().map(Vec::as_slice) != Some([terminal].as_slice()) {
            return Err(PipelineError::InvalidGraph(format!(
                "terminal stage '{terminal}' is not the last layer"
            )));
        }

        let reachable = self.ancestors(terminal);
        if let Some(orphan) = self
            .edges
            .keys()
            .find(|s| **s != terminal && !reachable.contains(*s))
        {
            return Err(PipelineError::InvalidGraph(format!(
                "terminal stage '{terminal}' does not consume '{orphan}'"
            )));
        }
        Ok(())
    }

    /// Group stages into layers; every stage's dependencies lie in earlier layers.
    pub fn layers(&self) -> PipelineResult<Vec<Vec<StageKind>>> {
        let mut remaining: BTreeMap<StageKind, usize> = self
            .edges
            .iter()
            .map(|(s, deps)| (*s, deps.len()))
            .collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<StageKind> = remaining
                .iter()
                .filter(|(_, pending)| **pending == 0)
                .map(|(s, _)| *s)
                .collect();

            if ready.is_empty() {
                return Err(PipelineError::InvalidGraph(format!(
                    "cycle among stages: {}",
                    remaining
                        .keys()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }

            for stage in &ready {
                remaining.remove(stage);
            }
            for (stage, pending) in &mut remaining {
                let satisfied = self.dependencies(*stage).filter(|d| ready.contains(d)).count();
                *pending -= satisfied;
            }
            layers.push(ready);
        }

        Ok(layers)
    }

    fn ancestors(&self, stage: StageKind) -> BTreeSet<StageKind> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<_> = self.dependencies(stage).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependencies(next));
            }
        }
        seen
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_graph_layers() {
        let graph = StageGraph::standard();
        graph.validate().unwrap();

        let layers = graph.layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], StageKind::first_tier());
        assert_eq!(layers[1], vec![StageKind::Synthesis]);
        assert_eq!(graph.terminal().unwrap(), StageKind::Synthesis);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut edges = BTreeMap::new();
        edges.insert(StageKind::PostType, BTreeSet::from([StageKind::Keywords]));
        edges.insert(StageKind::Keywords, BTreeSet::from([StageKind::PostType]));
        edges.insert(
            StageKind::Synthesis,
            BTreeSet::from([StageKind::PostType, StageKind::Keywords]),
        );

        let err = StageGraph::new(edges).validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraph(_)));
    }

    #[test]
    fn test_terminal_must_consume_everything() {
        let mut edges = BTreeMap::new();
        edges.insert(StageKind::PostType, BTreeSet::new());
        edges.insert(StageKind::Trend, BTreeSet::new());
        edges.insert(StageKind::Synthesis, BTreeSet::from([StageKind::PostType]));

        // Trend and Synthesis are both terminal
        let err = StageGraph::new(edges).validate().unwrap_err();
        assert!(err.to_string().contains("multiple terminal stages"));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("sentiment".parse(), Ok(StageKind::Sentiment));
        assert_eq!("Post-Type".parse(), Ok(StageKind::PostType));
        assert_eq!("correlation_analysis".parse(), Ok(StageKind::Synthesis));
        assert!("weather".parse::<StageKind>().unwrap_err().contains("'weather'"));
        assert_eq!(StageKind::Keywords.to_string(), "language_feature_extraction");
    }
}
