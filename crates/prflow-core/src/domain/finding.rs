//! Analysis findings.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed set of analysis categories a module belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Static,
    Dynamic,
    Security,
    Performance,
    Compliance,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Static,
        Category::Dynamic,
        Category::Security,
        Category::Performance,
        Category::Compliance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Static => "static",
            Category::Dynamic => "dynamic",
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Compliance => "compliance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity, totally ordered from `Low` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable finding identity.
///
/// Derived from module, title and location so that the same problem
/// reported before and after a fix carries the same id. An id names the
/// problem, not the record: two findings from one module with the same
/// title at the same file, line and column share an id. Nothing keys
/// results by id; a workflow keeps every result it is given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FindingId(String);

impl FindingId {
    fn derive(module: &str, title: &str, location: Option<&Location>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(module.as_bytes());
        hasher.update(b"\0");
        hasher.update(title.as_bytes());
        if let Some(loc) = location {
            hasher.update(b"\0");
            hasher.update(loc.file.as_bytes());
            hasher.update(b"\0");
            hasher.update(loc.line.unwrap_or(0).to_be_bytes());
            hasher.update(loc.column.unwrap_or(0).to_be_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        FindingId(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source location of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{}:{}:{}", self.file, l, c),
            (Some(l), None) => write!(f, "{}:{}", self.file, l),
            _ => f.write_str(&self.file),
        }
    }
}

/// One finding reported by an analysis module.
///
/// Built once by the producing module and never mutated afterwards;
/// downstream phases only borrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: FindingId,
    pub category: Category,
    /// Name of the module that produced this finding.
    pub module: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: Option<Location>,
    pub suggestion: Option<String>,
    pub auto_fixable: bool,
    /// Producer-specific keys; each module documents the keys it writes.
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(
        module: impl Into<String>,
        category: Category,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let module = module.into();
        let title = title.into();
        Self {
            id: FindingId::derive(&module, &title, None),
            category,
            module,
            severity,
            title,
            description: description.into(),
            location: None,
            suggestion: None,
            auto_fixable: false,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a location; the id is re-derived to include it.
    pub fn at(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.location = Some(Location {
            file: file.into(),
            line,
            column,
        });
        self.id = FindingId::derive(&self.module, &self.title, self.location.as_ref());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn auto_fixable(mut self, fixable: bool) -> Self {
        self.auto_fixable = fixable;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            category: self.category,
            module: self.module.clone(),
        }
    }
}

/// `(type, module)` key used to group findings into sub-issues.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub category: Category,
    pub module: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.module)
    }
}
