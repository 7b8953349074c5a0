//! Diagnostic findings produced by plugins.
//!
//! The core only reads findings: severity drives condition evaluation and the
//! rest is carried through to aggregation untouched.

use serde::{Deserialize, Serialize};

/// How serious a finding is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Blocker,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Blocker => "blocker",
        };
        f.write_str(s)
    }
}

/// A single diagnostic result item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Plugin-scoped finding identifier (e.g. "cors-wildcard-origin").
    pub id: String,
    /// Functional area the finding belongs to (e.g. "transport", "security").
    pub area: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Raw evidence captured by the plugin (request/response excerpts, etc.).
    #[serde(default)]
    pub evidence: Vec<serde_json::Value>,
}

impl Finding {
    /// Convenience constructor with empty description and evidence.
    pub fn new(id: impl Into<String>, area: impl Into<String>, severity: Severity, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            area: area.into(),
            severity,
            title: title.into(),
            description: String::new(),
            evidence: Vec::new(),
        }
    }
}
