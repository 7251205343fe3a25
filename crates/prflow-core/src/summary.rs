//! Aggregations over a finding list shared by issue creation and
//! reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AnalysisResult, Category, GroupKey, Severity};

/// Run-level summary written into the main tracking issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub categories: Vec<Category>,
    pub auto_fixable: usize,
}

impl FindingSummary {
    pub fn of(results: &[AnalysisResult]) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut categories = Vec::new();
        for r in results {
            *by_severity.entry(r.severity).or_insert(0) += 1;
            if !categories.contains(&r.category) {
                categories.push(r.category);
            }
        }
        categories.sort();
        Self {
            total: results.len(),
            by_severity,
            categories,
            auto_fixable: results.iter().filter(|r| r.auto_fixable).count(),
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.by_severity.keys().next_back().copied()
    }
}

/// Group findings by `(type, module)`, preserving each group's original
/// order. Groups come out sorted by key.
pub fn group_results(results: &[AnalysisResult]) -> BTreeMap<GroupKey, Vec<&AnalysisResult>> {
    let mut groups: BTreeMap<GroupKey, Vec<&AnalysisResult>> = BTreeMap::new();
    for r in results {
        groups.entry(r.group_key()).or_default().push(r);
    }
    groups
}
