//! Canonical error model
//!
//! Every tool parser reduces its native output to a list of [`ErrorInfo`]
//! records so callers never need to know which checker produced them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Severity of a single diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Note,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Note => "note",
        }
    }

    /// Map a tool's free-form severity label onto the canonical set.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "err" | "e" | "failed" | "failure" => Severity::Error,
            "warning" | "warn" | "w" => Severity::Warning,
            "note" | "help" => Severity::Note,
            "info" | "information" | "hint" => Severity::Info,
            _ => Severity::Error,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Severity::Error => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
            Severity::Note => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic reported by a tool.
///
/// `file` is empty for diagnostics that cannot be tied to a location
/// (generic fallback lines, test-runner summaries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub code: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ErrorInfo {
    pub fn new(file: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            file: normalize_file(&file.into()),
            line: None,
            column: None,
            code: None,
            message: message.into().trim().to_string(),
            severity,
        }
    }

    /// Shorthand for an error-severity record.
    pub fn error(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(file, message, Severity::Error)
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        if !code.trim().is_empty() {
            self.code = Some(code.trim().to_string());
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// `file:line:col` with whichever parts are known.
    pub fn location(&self) -> String {
        let mut out = self.file.clone();
        if let Some(line) = self.line {
            out.push_str(&format!(":{}", line));
            if let Some(col) = self.column {
                out.push_str(&format!(":{}", col));
            }
        }
        out
    }

    fn sort_key_cmp(&self, other: &Self) -> Ordering {
        self.severity
            .rank()
            .cmp(&other.severity.rank())
            .then_with(|| self.file.cmp(&other.file))
            .then_with(|| self.line.unwrap_or(0).cmp(&other.line.unwrap_or(0)))
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location();
        if !location.is_empty() {
            write!(f, "{}: ", location)?;
        }
        write!(f, "{}", self.severity)?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

fn normalize_file(raw: &str) -> String {
    let cleaned = raw.trim().replace('\\', "/");
    let mut out = cleaned.as_str();
    while let Some(rest) = out.strip_prefix("./") {
        out = rest;
    }
    out.to_string()
}

/// Collapse a list of diagnostics into one human-readable paragraph.
///
/// Errors are listed before warnings, then by file and line. At most
/// `max_items` individual diagnostics are shown.
pub fn summarize_errors(errors: &[ErrorInfo], max_items: usize) -> String {
    if errors.is_empty() {
        return "No errors".to_string();
    }

    let error_count = errors.iter().filter(|e| e.is_error()).count();
    let warning_count = errors.iter().filter(|e| e.is_warning()).count();

    let mut counts = Vec::new();
    if error_count > 0 {
        counts.push(plural(error_count, "error"));
    }
    if warning_count > 0 {
        counts.push(plural(warning_count, "warning"));
    }
    let other = errors.len() - error_count - warning_count;
    if other > 0 {
        counts.push(plural(other, "note"));
    }

    let files: BTreeSet<&str> = errors
        .iter()
        .map(|e| e.file.as_str())
        .filter(|f| !f.is_empty())
        .collect();

    let mut header = counts.join(", ");
    match files.len() {
        0 => {}
        1..=3 => {
            let names = files.iter().copied().collect::<Vec<_>>().join(", ");
            header.push_str(&format!(" in {}", names));
        }
        n => header.push_str(&format!(" in {} files", n)),
    }

    let mut sorted: Vec<&ErrorInfo> = errors.iter().collect();
    sorted.sort_by(|a, b| a.sort_key_cmp(b));

    let mut lines = vec![header];
    for error in sorted.iter().take(max_items) {
        lines.push(format!("  - {}", error));
    }
    if errors.len() > max_items {
        lines.push(format!("  ... and {} more", errors.len() - max_items));
    }
    lines.join("\n")
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", count, noun)
    }
}
