//! Markdown rendering for tracking issues and a file-backed issue tracker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::domain::{
    AnalysisResult, AutoFixResult, GroupKey, Improvement, PrContext, Result, Severity,
    WorkflowExecution,
};
use crate::ports::IssueTracker;
use crate::summary::FindingSummary;

const ISSUE_PREFIX: &str = "PRF-";

fn finding_line(r: &AnalysisResult) -> String {
    let location = match &r.location {
        Some(loc) => match loc.line {
            Some(line) => format!(" (`{}:{}`)", loc.file, line),
            None => format!(" (`{}`)", loc.file),
        },
        None => String::new(),
    };
    let fixable = if r.auto_fixable { " [auto-fixable]" } else { "" };
    format!("- **{}** {}{}{}\n", r.severity, r.title, location, fixable)
}

/// Top-level issue body for one run.
pub fn render_main_issue_md(pr: &PrContext, results: &[AnalysisResult]) -> String {
    let summary = FindingSummary::of(results);
    let mut out = String::new();
    out.push_str(&format!(
        "# PR analysis: {} #{} {}\n\n",
        pr.repository, pr.number, pr.title
    ));
    out.push_str(&format!(
        "- author: {}\n- branches: `{}` <- `{}`\n- files changed: {}\n\n",
        pr.author,
        pr.base_branch,
        pr.head_branch,
        pr.files.len()
    ));

    out.push_str("## Summary\n");
    out.push_str(&format!("- total findings: {}\n", summary.total));
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        out.push_str(&format!("- {}: {}\n", severity, summary.count(severity)));
    }
    let categories: Vec<&str> = summary.categories.iter().map(|c| c.as_str()).collect();
    out.push_str(&format!(
        "- categories: {}\n- auto-fixable: {}\n",
        if categories.is_empty() {
            "none".to_string()
        } else {
            categories.join(", ")
        },
        summary.auto_fixable
    ));
    out
}

pub fn render_sub_issue_md(
    parent_id: &str,
    group: &GroupKey,
    results: &[&AnalysisResult],
    pr: &PrContext,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} findings in {}\n\n", group, pr.key()));
    out.push_str(&format!("Parent: {}\n\n", parent_id));
    for r in results {
        out.push_str(&finding_line(r));
        if let Some(suggestion) = &r.suggestion {
            out.push_str(&format!("  - suggestion: {}\n", suggestion));
        }
    }
    out
}

pub fn render_fix_update_md(result: &AnalysisResult, fix: &AutoFixResult) -> String {
    let mut out = String::new();
    let status = if fix.success { "applied" } else { "failed" };
    out.push_str(&format!(
        "\n## Auto-fix {}: {} ({})\n",
        status, result.title, result.id
    ));
    for change in &fix.changes {
        out.push_str(&format!("- `{}` {:?}\n", change.path, change.change_type));
    }
    if let Some(commit) = &fix.commit_id {
        out.push_str(&format!("- commit: {}\n", commit));
    }
    if let Some(error) = &fix.error {
        out.push_str(&format!("- error: {}\n", error));
    }
    out
}

pub fn render_validation_update_md(improvement: &Improvement, remaining: &[AnalysisResult]) -> String {
    let mut out = String::new();
    out.push_str("\n## Validation\n");
    out.push_str(&format!(
        "- original findings: {}\n- remaining: {}\n- fixed: {} ({:.1}%)\n",
        improvement.original, improvement.remaining, improvement.fixed, improvement.percentage
    ));
    if !remaining.is_empty() {
        out.push_str("\n### Remaining\n");
        for r in remaining {
            out.push_str(&finding_line(r));
        }
    }
    out
}

/// Write the full workflow as pretty JSON.
pub fn write_workflow_report_json(path: &Path, workflow: &WorkflowExecution) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(workflow).context("serialize workflow report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Issue tracker that keeps each issue as `<dir>/PRF-<n>.md`.
///
/// Updates are appended to the issue file. Numbering continues after the
/// highest id already in the directory.
pub struct MarkdownIssueTracker {
    dir: PathBuf,
    last_id: AtomicUsize,
}

impl MarkdownIssueTracker {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let mut highest = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let n = name
                .to_str()
                .and_then(|n| n.strip_prefix(ISSUE_PREFIX))
                .and_then(|n| n.strip_suffix(".md"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(n) = n {
                highest = highest.max(n);
            }
        }
        Ok(Self {
            dir,
            last_id: AtomicUsize::new(highest),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn issue_path(&self, issue_id: &str) -> PathBuf {
        self.dir.join(format!("{issue_id}.md"))
    }

    async fn create(&self, body: &str) -> Result<String> {
        let id = format!(
            "{}{}",
            ISSUE_PREFIX,
            self.last_id.fetch_add(1, Ordering::SeqCst) + 1
        );
        tokio::fs::write(self.issue_path(&id), body).await?;
        tracing::debug!(issue_id = %id, "issue written");
        Ok(id)
    }

    async fn append(&self, issue_id: &str, body: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.issue_path(issue_id))
            .await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for MarkdownIssueTracker {
    async fn create_main_issue(
        &self,
        pr: &PrContext,
        results: &[AnalysisResult],
    ) -> Result<String> {
        self.create(&render_main_issue_md(pr, results)).await
    }

    async fn create_sub_issue(
        &self,
        parent_id: &str,
        group: &GroupKey,
        results: &[&AnalysisResult],
        pr: &PrContext,
    ) -> Result<String> {
        self.create(&render_sub_issue_md(parent_id, group, results, pr))
            .await
    }

    async fn update_issue_with_fix(
        &self,
        issue_id: &str,
        result: &AnalysisResult,
        fix: &AutoFixResult,
    ) -> Result<()> {
        self.append(issue_id, &render_fix_update_md(result, fix)).await
    }

    async fn update_main_issue_with_validation(
        &self,
        issue_id: &str,
        improvement: &Improvement,
        remaining: &[AnalysisResult],
    ) -> Result<()> {
        self.append(issue_id, &render_validation_update_md(improvement, remaining))
            .await
    }
}
