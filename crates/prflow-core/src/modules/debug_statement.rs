//! Flags leftover debugging statements and proposes deleting them.

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{AnalysisResult, AutoFixResult, Category, ChangeType, FileChange, PrContext, Severity};
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};
use crate::modules::diff::DiffReader;

pub const NAME: &str = "debug_statement";

const PATTERNS: [&str; 5] = [
    r"\bdbg!\(",
    r"\bconsole\.(log|debug|trace)\(",
    r"\bdebugger\s*;",
    r"\bpdb\.set_trace\(\)",
    r"\bbinding\.pry\b",
];

/// Metadata key holding the offending line, used to build the fix.
const LINE_TEXT: &str = "line_text";

pub struct DebugStatementModule {
    patterns: Vec<Regex>,
    diff: DiffReader,
}

impl Default for DebugStatementModule {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugStatementModule {
    pub fn new() -> Self {
        Self {
            patterns: PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect(),
            diff: DiffReader::new(),
        }
    }
}

#[async_trait]
impl AnalysisModule for DebugStatementModule {
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
        _settings: &ModuleSettings,
    ) -> Result<Vec<AnalysisResult>, ModuleError> {
        let mut findings = Vec::new();
        for file in &pr.files {
            let Some(patch) = &file.patch else { continue };
            for added in self.diff.added_lines(patch) {
                if !self.patterns.iter().any(|p| p.is_match(added.text)) {
                    continue;
                }
                findings.push(
                    AnalysisResult::new(
                        NAME,
                        Category::Static,
                        Severity::Medium,
                        "Debug statement left in code",
                        format!("`{}` looks like leftover debugging", added.text.trim()),
                    )
                    .at(file.path.clone(), Some(added.line), None)
                    .with_suggestion("Remove the statement or replace it with structured logging")
                    .with_metadata(LINE_TEXT, serde_json::json!(added.text))
                    .auto_fixable(true),
                );
            }
        }
        Ok(findings)
    }

    fn can_auto_fix(&self, result: &AnalysisResult) -> bool {
        result.module == NAME
            && result.auto_fixable
            && result.metadata.contains_key(LINE_TEXT)
            && result.location.as_ref().is_some_and(|l| l.line.is_some())
    }

    fn supports_auto_fix(&self) -> bool {
        true
    }

    /// Proposes a one-line deletion as a unified diff; applying it is up to
    /// the caller.
    async fn auto_fix(
        &self,
        result: &AnalysisResult,
        _pr: &PrContext,
    ) -> Result<AutoFixResult, ModuleError> {
        let (Some(location), Some(text)) = (
            result.location.as_ref(),
            result.metadata.get(LINE_TEXT).and_then(|v| v.as_str()),
        ) else {
            return Ok(AutoFixResult::failed("finding carries no line to remove"));
        };
        let Some(line) = location.line else {
            return Ok(AutoFixResult::failed("finding carries no line number"));
        };

        let diff = format!(
            "--- a/{path}\n+++ b/{path}\n@@ -{line},1 +{next},0 @@\n-{text}\n",
            path = location.file,
            next = line.saturating_sub(1),
        );
        Ok(AutoFixResult::applied(vec![FileChange {
            path: location.file.clone(),
            change_type: ChangeType::Modified,
            content: None,
            diff: Some(diff),
        }]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangedFile, FileStatus};
    use crate::fakes::sample_pr;

    fn pr_with_debug() -> PrContext {
        let mut pr = sample_pr();
        pr.files.push(ChangedFile {
            path: "web/app.js".to_string(),
            status: FileStatus::Modified,
            additions: 2,
            deletions: 0,
            patch: Some("@@ -10,1 +10,3 @@\n render();\n+console.log(state);\n+debugger;\n".to_string()),
        });
        pr
    }

    #[tokio::test]
    async fn flags_each_debug_line_as_fixable() {
        let module = DebugStatementModule::new();
        let findings = module
            .analyze(&pr_with_debug(), &ModuleSettings::default())
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.auto_fixable));
        assert_eq!(findings[0].location.as_ref().unwrap().line, Some(11));
        assert!(module.can_auto_fix(&findings[0]));
    }

    #[tokio::test]
    async fn fix_proposes_line_removal() {
        let module = DebugStatementModule::new();
        let pr = pr_with_debug();
        let findings = module.analyze(&pr, &ModuleSettings::default()).await.unwrap();
        let fix = module.auto_fix(&findings[1], &pr).await.unwrap();
        assert!(fix.success);
        let diff = fix.changes[0].diff.as_deref().unwrap();
        assert!(diff.contains("@@ -12,1 +11,0 @@\n-debugger;\n"));
    }

    #[tokio::test]
    async fn fix_without_line_text_is_unsuccessful() {
        let module = DebugStatementModule::new();
        let bare = AnalysisResult::new(NAME, Category::Static, Severity::Medium, "x", "y")
            .at("a.js", Some(1), None)
            .auto_fixable(true);
        assert!(!module.can_auto_fix(&bare));
        let fix = module.auto_fix(&bare, &sample_pr()).await.unwrap();
        assert!(!fix.success);
    }
}
