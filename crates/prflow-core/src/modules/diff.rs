//! Unified diff helpers shared by the line-oriented modules.

use regex::Regex;

const HUNK_HEADER: &str = r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@";

/// One `+` line of a patch with its line number in the new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedLine<'a> {
    pub line: u32,
    pub text: &'a str,
}

/// Reads added lines out of unified diffs.
///
/// Holds the compiled hunk-header pattern; modules keep one for their
/// lifetime.
#[derive(Debug, Clone)]
pub struct DiffReader {
    header: Option<Regex>,
}

impl Default for DiffReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffReader {
    pub fn new() -> Self {
        Self {
            header: Regex::new(HUNK_HEADER).ok(),
        }
    }

    /// Added lines of `patch`, numbered from each hunk's `+c,d` header.
    ///
    /// Text before the first hunk header, and malformed hunks, yield nothing.
    /// Line numbers saturate at `u32::MAX`.
    pub fn added_lines<'a>(&self, patch: &'a str) -> Vec<AddedLine<'a>> {
        let Some(header) = &self.header else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut next_line: Option<u32> = None;
        for raw in patch.lines() {
            if let Some(caps) = header.captures(raw) {
                next_line = caps.get(1).and_then(|m| m.as_str().parse().ok());
                continue;
            }
            let Some(line) = next_line.as_mut() else {
                continue;
            };
            if raw.starts_with("+++") || raw.starts_with("---") {
                continue;
            }
            if let Some(text) = raw.strip_prefix('+') {
                out.push(AddedLine { line: *line, text });
                *line = line.saturating_add(1);
            } else if raw.starts_with(' ') || raw.is_empty() {
                *line = line.saturating_add(1);
            }
            // '-' lines and "\ No newline at end of file" do not advance.
        }
        out
    }
}
