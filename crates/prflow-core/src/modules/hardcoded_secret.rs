//! Flags credentials committed in added lines.

use async_trait::async_trait;
use regex::Regex;

use crate::domain::{AnalysisResult, Category, PrContext, Severity};
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};
use crate::modules::diff::DiffReader;

pub const NAME: &str = "hardcoded_secret";

const RULES: [(&str, &str); 4] = [
    ("AWS access key id", r"\bAKIA[0-9A-Z]{16}\b"),
    ("GitHub token", r"\bgh[pousr]_[A-Za-z0-9]{36}\b"),
    ("Private key block", r"-----BEGIN (?:RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----"),
    (
        "Credential assignment",
        r#"(?i)\b(?:api[_-]?key|secret|password|passwd|token)\s*[:=]\s*["'][^"'\s]{8,}["']"#,
    ),
];

pub struct HardcodedSecretModule {
    rules: Vec<(&'static str, Regex)>,
    diff: DiffReader,
}

impl Default for HardcodedSecretModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardcodedSecretModule {
    pub fn new() -> Self {
        Self {
            rules: RULES
                .iter()
                .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (*label, re)))
                .collect(),
            diff: DiffReader::new(),
        }
    }
}

#[async_trait]
impl AnalysisModule for HardcodedSecretModule {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Security
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
                // One finding per line; the first matching rule names it.
                let Some((label, _)) = self.rules.iter().find(|(_, re)| re.is_match(added.text))
                else {
                    continue;
                };
                findings.push(
                    AnalysisResult::new(
                        NAME,
                        Category::Security,
                        Severity::Critical,
                        format!("{label} committed"),
                        "A credential appears in the diff; the value is not repeated here",
                    )
                    .at(file.path.clone(), Some(added.line), None)
                    .with_suggestion("Rotate the credential and load it from the environment or a secret store")
                    .with_metadata("rule", serde_json::json!(label)),
                );
            }
        }
        Ok(findings)
    }
}
