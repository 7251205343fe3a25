//! Flags pull requests too large to review comfortably.

use async_trait::async_trait;

use crate::domain::{AnalysisResult, Category, PrContext, Severity};
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};

pub const NAME: &str = "oversized_change";

const DEFAULT_MAX_ADDITIONS: u64 = 400;
const DEFAULT_MAX_FILES: u64 = 50;

/// Settings: `max_additions` (default 400), `max_files` (default 50).
#[derive(Debug, Default)]
pub struct OversizedChangeModule;

#[async_trait]
impl AnalysisModule for OversizedChangeModule {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Compliance
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn analyze(
        &self,
        pr: &PrContext,
        settings: &ModuleSettings,
    ) -> Result<Vec<AnalysisResult>, ModuleError> {
        let max_additions = settings.u64_or("max_additions", DEFAULT_MAX_ADDITIONS);
        let max_files = settings.u64_or("max_files", DEFAULT_MAX_FILES);
        if max_additions == 0 || max_files == 0 {
            return Err(ModuleError::InvalidSettings(
                "max_additions and max_files must be positive".to_string(),
            ));
        }

        let mut findings = Vec::new();
        let additions = pr.total_additions();
        if additions > max_additions {
            findings.push(
                AnalysisResult::new(
                    NAME,
                    Category::Compliance,
                    Severity::Medium,
                    "Pull request adds too many lines",
                    format!("{additions} lines added; the limit is {max_additions}"),
                )
                .with_suggestion("Split the change into smaller pull requests")
                .with_metadata("additions", serde_json::json!(additions)),
            );
        }
        let files = pr.files.len() as u64;
        if files > max_files {
            findings.push(
                AnalysisResult::new(
                    NAME,
                    Category::Compliance,
                    Severity::Low,
                    "Pull request touches too many files",
                    format!("{files} files changed; the limit is {max_files}"),
                )
                .with_metadata("files", serde_json::json!(files)),
            );
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::sample_pr;

    fn settings(value: serde_json::Value) -> ModuleSettings {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn small_pr_passes_with_defaults() {
        let findings = OversizedChangeModule
            .analyze(&sample_pr(), &ModuleSettings::default())
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn thresholds_come_from_settings() {
        let findings = OversizedChangeModule
            .analyze(
                &sample_pr(),
                &settings(serde_json::json!({ "max_additions": 2, "max_files": 2 })),
            )
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!(findings[0].description.starts_with("5 lines added"));
    }

    #[tokio::test]
    async fn zero_threshold_is_rejected() {
        let err = OversizedChangeModule
            .analyze(&sample_pr(), &settings(serde_json::json!({ "max_files": 0 })))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidSettings(_)));
    }
}
