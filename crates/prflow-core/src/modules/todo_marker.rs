//! Flags TODO-style markers introduced by the pull request.

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{AnalysisResult, Category, PrContext, Severity};
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};
use crate::modules::diff::DiffReader;

pub const NAME: &str = "todo_marker";

const DEFAULT_MARKERS: [&str; 3] = ["TODO", "FIXME", "XXX"];

/// Settings: `markers = ["TODO", ...]` replaces the default marker set.
#[derive(Debug, Default)]
pub struct TodoMarkerModule {
    diff: DiffReader,
}

impl TodoMarkerModule {
    pub fn new() -> Self {
        Self::default()
    }
}

fn marker_pattern(settings: &ModuleSettings) -> Result<Regex, ModuleError> {
    let mut markers = settings.string_list("markers");
    if markers.is_empty() {
        markers = DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect();
    }
    let alternation: Vec<String> = markers.iter().map(|m| regex::escape(m)).collect();
    Regex::new(&format!(r"\b({})\b", alternation.join("|")))
        .map_err(|e| ModuleError::InvalidSettings(e.to_string()))
}

#[async_trait]
impl AnalysisModule for TodoMarkerModule {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Static
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn analyze(
        &self,
        pr: &PrContext,
        settings: &ModuleSettings,
    ) -> Result<Vec<AnalysisResult>, ModuleError> {
        let pattern = marker_pattern(settings)?;
        let mut findings = Vec::new();
        for file in &pr.files {
            let Some(patch) = &file.patch else { continue };
            for added in self.diff.added_lines(patch) {
                let Some(m) = pattern.find(added.text) else {
                    continue;
                };
                findings.push(
                    AnalysisResult::new(
                        NAME,
                        Category::Static,
                        Severity::Low,
                        format!("{} marker added", m.as_str()),
                        format!("`{}` introduces an unresolved {} marker", added.text.trim(), m.as_str()),
                    )
                    .at(file.path.clone(), Some(added.line), Some(m.start() as u32 + 1))
                    .with_suggestion("Track the follow-up in an issue and reference it here"),
                );
            }
        }
        Ok(findings)
    }
}
