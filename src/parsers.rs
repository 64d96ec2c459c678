//! Tool output parsers
//!
//! One parser per tool family. Structured (JSON) output is tried first when
//! the tool can produce it, then the tool's default text format. When no
//! parser in a chain yields anything, [`generic_fallback`] pulls out lines
//! that look like failures so a failing gate always carries some diagnostic.

use crate::diagnostics::{ErrorInfo, Severity};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Max records the generic fallback will produce
const GENERIC_FALLBACK_LIMIT: usize = 20;

/// Tool families with a dedicated parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Tsc,
    Mypy,
    Pyright,
    Eslint,
    Ruff,
    Flake8,
    Pytest,
    Jest,
    /// rustc diagnostics via cargo check / cargo clippy
    Cargo,
    CargoTest,
    /// go build / go vet / golangci-lint
    Go,
    GoTest,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Tsc => "tsc",
            Tool::Mypy => "mypy",
            Tool::Pyright => "pyright",
            Tool::Eslint => "eslint",
            Tool::Ruff => "ruff",
            Tool::Flake8 => "flake8",
            Tool::Pytest => "pytest",
            Tool::Jest => "jest",
            Tool::Cargo => "cargo",
            Tool::CargoTest => "cargo-test",
            Tool::Go => "go",
            Tool::GoTest => "go-test",
        }
    }

    pub fn parse(&self, raw: &str) -> Vec<ErrorInfo> {
        let text = strip_ansi(raw);
        match self {
            Tool::Tsc => parse_tsc(&text),
            Tool::Mypy => parse_mypy(&text),
            Tool::Pyright => parse_pyright(&text),
            Tool::Eslint => parse_eslint(&text),
            Tool::Ruff => parse_ruff(&text),
            Tool::Flake8 => parse_flake8(&text),
            Tool::Pytest => parse_pytest(&text),
            Tool::Jest => parse_jest(&text),
            Tool::Cargo => parse_cargo(&text),
            Tool::CargoTest => parse_cargo_test(&text),
            Tool::Go => parse_go(&text),
            Tool::GoTest => parse_go_test(&text),
        }
    }
}

/// Run a parser chain over raw tool output.
///
/// Returns the first non-empty result; falls back to [`generic_fallback`].
pub fn parse_output(tools: &[Tool], raw: &str) -> Vec<ErrorInfo> {
    for tool in tools {
        let errors = tool.parse(raw);
        if !errors.is_empty() {
            tracing::debug!(tool = tool.name(), count = errors.len(), "parsed tool output");
            return errors;
        }
    }
    if !tools.is_empty() {
        tracing::debug!("no dedicated parser matched, using generic fallback");
    }
    generic_fallback(raw)
}

/// Wrap lines mentioning `error` or `fail` as file-less error records.
///
/// If nothing matches, the last non-empty line is used so a non-empty
/// output never yields zero records.
pub fn generic_fallback(raw: &str) -> Vec<ErrorInfo> {
    let text = strip_ansi(raw);
    let mut out: Vec<ErrorInfo> = text
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("fail")
        })
        .take(GENERIC_FALLBACK_LIMIT)
        .map(|line| ErrorInfo::error("", line))
        .collect();

    if out.is_empty() {
        if let Some(last) = text.lines().map(str::trim).rfind(|l| !l.is_empty()) {
            out.push(ErrorInfo::error("", last));
        }
    }
    out
}

/// Remove ANSI color/control sequences.
pub fn strip_ansi(raw: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    match cached(&ANSI, r"\x1b\[[0-9;?]*[ -/]*[@-~]") {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw.to_string(),
    }
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn num(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn json_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

/// Parse a whole-document JSON value, tolerating leading noise such as
/// npm banners before the payload.
fn parse_json_document(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find(['[', '{'])?;
    serde_json::from_str(&trimmed[start..]).ok()
}

/// JSON objects emitted one per line.
fn json_lines(text: &str) -> impl Iterator<Item = Value> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
}

// ───────────────────────────── typecheckers ─────────────────────────────

fn parse_tsc(text: &str) -> Vec<ErrorInfo> {
    static PLAIN: OnceLock<Option<Regex>> = OnceLock::new();
    static PRETTY: OnceLock<Option<Regex>> = OnceLock::new();
    let plain = cached(
        &PLAIN,
        r"^\s*(?P<file>[^\s(][^()]*)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning|message)\s+(?P<code>TS\d+):\s*(?P<msg>.+)$",
    );
    let pretty = cached(
        &PRETTY,
        r"^\s*(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+)\s+-\s+(?P<sev>error|warning|message)\s+(?P<code>TS\d+):\s*(?P<msg>.+)$",
    );

    let mut out = Vec::new();
    for line in text.lines() {
        let caps = plain
            .and_then(|re| re.captures(line))
            .or_else(|| pretty.and_then(|re| re.captures(line)));
        let Some(caps) = caps else { continue };
        let severity = match &caps["sev"] {
            "message" => Severity::Info,
            other => Severity::from_label(other),
        };
        out.push(
            ErrorInfo::new(&caps["file"], &caps["msg"], severity)
                .at(num(&caps, "line"), num(&caps, "col"))
                .with_code(&caps["code"]),
        );
    }
    out
}

fn parse_mypy(text: &str) -> Vec<ErrorInfo> {
    let structured: Vec<ErrorInfo> = json_lines(text)
        .filter_map(|value| {
            let file = value.get("file")?.as_str()?;
            let message = value.get("message")?.as_str()?;
            let severity = value
                .get("severity")
                .and_then(Value::as_str)
                .map(Severity::from_label)
                .unwrap_or(Severity::Error);
            let mut info = ErrorInfo::new(file, message, severity).at(
                value.get("line").and_then(json_u32),
                value
                    .get("column")
                    .and_then(json_u32)
                    .filter(|c| *c > 0),
            );
            if let Some(code) = value.get("code").and_then(Value::as_str) {
                info = info.with_code(code);
            }
            Some(info)
        })
        .collect();
    if !structured.is_empty() {
        return structured;
    }

    static TEXT: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(
        &TEXT,
        r"^(?P<file>[^:\s][^:]*\.pyi?):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<sev>error|warning|note):\s*(?P<msg>.*?)(?:\s+\[(?P<code>[\w-]+)\])?\s*$",
    ) else {
        return Vec::new();
    };

    text.lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| {
            let mut info = ErrorInfo::new(
                &caps["file"],
                &caps["msg"],
                Severity::from_label(&caps["sev"]),
            )
            .at(num(&caps, "line"), num(&caps, "col"));
            if let Some(code) = caps.name("code") {
                info = info.with_code(code.as_str());
            }
            info
        })
        .collect()
}

fn parse_pyright(text: &str) -> Vec<ErrorInfo> {
    let Some(doc) = parse_json_document(text) else {
        return Vec::new();
    };
    let Some(diagnostics) = doc.get("generalDiagnostics").and_then(Value::as_array) else {
        return Vec::new();
    };

    diagnostics
        .iter()
        .filter_map(|d| {
            let file = d.get("file").and_then(Value::as_str).unwrap_or("");
            let message = d.get("message")?.as_str()?;
            let severity = d
                .get("severity")
                .and_then(Value::as_str)
                .map(Severity::from_label)
                .unwrap_or(Severity::Error);
            let start = d.get("range").and_then(|r| r.get("start"));
            let line = start
                .and_then(|s| s.get("line"))
                .and_then(json_u32)
                .map(|l| l + 1);
            let col = start
                .and_then(|s| s.get("character"))
                .and_then(json_u32)
                .map(|c| c + 1);
            let mut info = ErrorInfo::new(file, message, severity).at(line, col);
            if let Some(rule) = d.get("rule").and_then(Value::as_str) {
                info = info.with_code(rule);
            }
            Some(info)
        })
        .collect()
}

fn parse_cargo(text: &str) -> Vec<ErrorInfo> {
    let structured: Vec<ErrorInfo> = json_lines(text)
        .filter(|v| v.get("reason").and_then(Value::as_str) == Some("compiler-message"))
        .filter_map(|v| cargo_json_message(v.get("message")?))
        .collect();
    if !structured.is_empty() {
        return structured;
    }
    parse_rustc_human(text)
}

fn cargo_json_message(message: &Value) -> Option<ErrorInfo> {
    let level = message.get("level")?.as_str()?;
    if !matches!(level, "error" | "warning") {
        return None;
    }
    let text = message.get("message")?.as_str()?;
    let spans = message.get("spans")?.as_array()?;
    let primary = spans
        .iter()
        .find(|s| s.get("is_primary").and_then(Value::as_bool) == Some(true))
        .or_else(|| spans.first())?;

    let file = primary.get("file_name")?.as_str()?;
    let mut info = ErrorInfo::new(file, text, Severity::from_label(level)).at(
        primary.get("line_start").and_then(json_u32),
        primary.get("column_start").and_then(json_u32),
    );
    if let Some(code) = message
        .get("code")
        .and_then(|c| c.get("code"))
        .and_then(Value::as_str)
    {
        info = info.with_code(code);
    }
    Some(info)
}

fn parse_rustc_human(text: &str) -> Vec<ErrorInfo> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    static ARROW: OnceLock<Option<Regex>> = OnceLock::new();
    let (Some(header), Some(arrow)) = (
        cached(
            &HEADER,
            r"^(?P<sev>error|warning)(?:\[(?P<code>[^\]]+)\])?:\s*(?P<msg>.+)$",
        ),
        cached(
            &ARROW,
            r"^\s*-->\s*(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+)",
        ),
    ) else {
        return Vec::new();
    };

    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = header.captures(line) else {
            continue;
        };
        // A header only counts if a location arrow follows closely; this drops
        // "aborting due to" and "generated N warnings" trailers.
        let location = lines
            .iter()
            .skip(idx + 1)
            .take(3)
            .find_map(|l| arrow.captures(l));
        let Some(loc) = location else { continue };
        let mut info = ErrorInfo::new(
            &loc["file"],
            &caps["msg"],
            Severity::from_label(&caps["sev"]),
        )
        .at(num(&loc, "line"), num(&loc, "col"));
        if let Some(code) = caps.name("code") {
            info = info.with_code(code.as_str());
        }
        out.push(info);
    }
    out
}

static GO_LOCATION: OnceLock<Option<Regex>> = OnceLock::new();

fn go_location() -> Option<&'static Regex> {
    cached(
        &GO_LOCATION,
        r"^\s*(?P<file>[^\s:]+\.go):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<msg>.+)$",
    )
}

fn parse_go(text: &str) -> Vec<ErrorInfo> {
    let Some(re) = go_location() else {
        return Vec::new();
    };
    text.lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| {
            ErrorInfo::error(&caps["file"], &caps["msg"]).at(num(&caps, "line"), num(&caps, "col"))
        })
        .collect()
}

// ──────────────────────────────── linters ───────────────────────────────

fn parse_eslint(text: &str) -> Vec<ErrorInfo> {
    if let Some(Value::Array(files)) = parse_json_document(text) {
        let mut out = Vec::new();
        for file in &files {
            let path = file.get("filePath").and_then(Value::as_str).unwrap_or("");
            let Some(messages) = file.get("messages").and_then(Value::as_array) else {
                continue;
            };
            for msg in messages {
                let Some(message) = msg.get("message").and_then(Value::as_str) else {
                    continue;
                };
                let severity = match msg.get("severity").and_then(Value::as_u64) {
                    Some(2) => Severity::Error,
                    Some(1) => Severity::Warning,
                    _ => Severity::Info,
                };
                let mut info = ErrorInfo::new(path, message, severity).at(
                    msg.get("line").and_then(json_u32),
                    msg.get("column").and_then(json_u32),
                );
                if let Some(rule) = msg.get("ruleId").and_then(Value::as_str) {
                    info = info.with_code(rule);
                }
                out.push(info);
            }
        }
        if !out.is_empty() {
            return out;
        }
    }

    // stylish formatter: a file header followed by indented diagnostics
    static ROW: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(row) = cached(
        &ROW,
        r"^\s+(?P<line>\d+):(?P<col>\d+)\s+(?P<sev>error|warning)\s+(?P<msg>.+?)(?:\s{2,}(?P<rule>[@\w/-]+))?\s*$",
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut current_file: Option<String> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = row.captures(line) {
            let Some(file) = &current_file else { continue };
            let mut info = ErrorInfo::new(
                file.as_str(),
                &caps["msg"],
                Severity::from_label(&caps["sev"]),
            )
            .at(num(&caps, "line"), num(&caps, "col"));
            if let Some(rule) = caps.name("rule") {
                info = info.with_code(rule.as_str());
            }
            out.push(info);
        } else if !line.starts_with(char::is_whitespace) && !line.starts_with('✖') {
            current_file = Some(line.trim().to_string());
        }
    }
    out
}

fn parse_ruff(text: &str) -> Vec<ErrorInfo> {
    if let Some(Value::Array(items)) = parse_json_document(text) {
        let out: Vec<ErrorInfo> = items
            .iter()
            .filter_map(|item| {
                let file = item.get("filename")?.as_str()?;
                let message = item.get("message")?.as_str()?;
                let location = item.get("location");
                let mut info = ErrorInfo::error(file, message).at(
                    location.and_then(|l| l.get("row")).and_then(json_u32),
                    location.and_then(|l| l.get("column")).and_then(json_u32),
                );
                if let Some(code) = item.get("code").and_then(Value::as_str) {
                    info = info.with_code(code);
                }
                Some(info)
            })
            .collect();
        if !out.is_empty() {
            return out;
        }
    }
    parse_pycodestyle_text(text, false)
}

fn parse_flake8(text: &str) -> Vec<ErrorInfo> {
    parse_pycodestyle_text(text, true)
}

/// `path:line:col: CODE message` as printed by ruff (concise) and flake8.
fn parse_pycodestyle_text(text: &str, warning_prefixes: bool) -> Vec<ErrorInfo> {
    static TEXT: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(
        &TEXT,
        r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<code>[A-Z]+\d+)\s+(?:\[\*\]\s+)?(?P<msg>.+)$",
    ) else {
        return Vec::new();
    };

    text.lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| {
            let code = &caps["code"];
            let severity = if warning_prefixes && (code.starts_with('W') || code.starts_with('C')) {
                Severity::Warning
            } else {
                Severity::Error
            };
            ErrorInfo::new(&caps["file"], &caps["msg"], severity)
                .at(num(&caps, "line"), num(&caps, "col"))
                .with_code(code)
        })
        .collect()
}

// ───────────────────────────── test runners ─────────────────────────────

fn parse_pytest(text: &str) -> Vec<ErrorInfo> {
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    static LOCATION: OnceLock<Option<Regex>> = OnceLock::new();
    let (Some(summary), Some(location)) = (
        cached(
            &SUMMARY,
            r"^(?P<kind>FAILED|ERROR)\s+(?P<file>[^\s:]+\.py)(?:::(?P<test>\S+))?(?:\s+-\s+(?P<msg>.+))?$",
        ),
        cached(&LOCATION, r"^(?P<file>[^\s:]+\.py):(?P<line>\d+):\s+(?P<exc>\w+)"),
    ) else {
        return Vec::new();
    };

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let mut out = Vec::new();
    for line in &lines {
        let Some(caps) = summary.captures(line) else {
            continue;
        };
        let file = &caps["file"];
        let detail = caps
            .name("msg")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| caps["kind"].to_ascii_lowercase());
        let message = match caps.name("test") {
            Some(test) => format!("{}: {}", test.as_str(), detail),
            None => detail,
        };
        let line_no = lines
            .iter()
            .filter_map(|l| location.captures(l))
            .find(|loc| &loc["file"] == file)
            .and_then(|loc| num(&loc, "line"));
        out.push(ErrorInfo::error(file, message).at(line_no, None));
    }
    out
}

fn parse_jest(text: &str) -> Vec<ErrorInfo> {
    if let Some(doc) = parse_json_document(text) {
        if let Some(results) = doc.get("testResults").and_then(Value::as_array) {
            let mut out = Vec::new();
            for suite in results {
                let file = suite.get("name").and_then(Value::as_str).unwrap_or("");
                let assertions = suite
                    .get("assertionResults")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let mut suite_failures = 0;
                for assertion in assertions {
                    if assertion.get("status").and_then(Value::as_str) != Some("failed") {
                        continue;
                    }
                    suite_failures += 1;
                    let name = assertion
                        .get("fullName")
                        .and_then(Value::as_str)
                        .unwrap_or("test");
                    let first_failure = assertion
                        .get("failureMessages")
                        .and_then(Value::as_array)
                        .and_then(|m| m.first())
                        .and_then(Value::as_str)
                        .and_then(|m| m.lines().map(str::trim).find(|l| !l.is_empty()))
                        .unwrap_or("failed");
                    let line = assertion
                        .get("location")
                        .and_then(|l| l.get("line"))
                        .and_then(json_u32);
                    out.push(
                        ErrorInfo::error(file, format!("{}: {}", name, first_failure))
                            .at(line, None),
                    );
                }
                // Suites that fail to run at all have no assertion results.
                if suite_failures == 0
                    && suite.get("status").and_then(Value::as_str) == Some("failed")
                {
                    let message = suite
                        .get("message")
                        .and_then(Value::as_str)
                        .and_then(|m| m.lines().map(str::trim).find(|l| !l.is_empty()))
                        .unwrap_or("test suite failed to run");
                    out.push(ErrorInfo::error(file, message));
                }
            }
            if !out.is_empty() {
                return out;
            }
        }
    }

    static FAIL: OnceLock<Option<Regex>> = OnceLock::new();
    static BULLET: OnceLock<Option<Regex>> = OnceLock::new();
    let (Some(fail), Some(bullet)) = (
        cached(&FAIL, r"^\s*FAIL\s+(?P<file>\S+)"),
        cached(&BULLET, r"^\s*●\s+(?P<name>.+)$"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut current_file = String::new();
    for line in text.lines() {
        if let Some(caps) = fail.captures(line) {
            current_file = caps["file"].to_string();
        } else if let Some(caps) = bullet.captures(line) {
            let name = caps["name"].trim();
            if name.starts_with("Console") {
                continue;
            }
            out.push(ErrorInfo::error(current_file.as_str(), name));
        }
    }
    out
}

fn parse_cargo_test(text: &str) -> Vec<ErrorInfo> {
    static PANIC: OnceLock<Option<Regex>> = OnceLock::new();
    static FAILED: OnceLock<Option<Regex>> = OnceLock::new();
    let (Some(panic), Some(failed)) = (
        cached(
            &PANIC,
            r"^thread '(?P<test>[^']+)' panicked at (?:'(?P<old>.*)', )?(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):?\s*$",
        ),
        cached(&FAILED, r"^test (?P<test>\S+) \.\.\. FAILED$"),
    ) else {
        return Vec::new();
    };

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = panic.captures(line) else {
            continue;
        };
        let detail = match caps.name("old") {
            Some(old) => old.as_str().to_string(),
            None => lines
                .iter()
                .skip(idx + 1)
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
                .unwrap_or("panicked")
                .to_string(),
        };
        out.push(
            ErrorInfo::error(&caps["file"], format!("{}: {}", &caps["test"], detail))
                .at(num(&caps, "line"), num(&caps, "col")),
        );
    }
    if !out.is_empty() {
        return out;
    }

    lines
        .iter()
        .filter_map(|l| failed.captures(l))
        .map(|caps| ErrorInfo::error("", format!("{} failed", &caps["test"])))
        .collect()
}

fn parse_go_test(text: &str) -> Vec<ErrorInfo> {
    let located = parse_go(text);
    if !located.is_empty() {
        return located;
    }

    static FAIL: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(&FAIL, r"^\s*--- FAIL: (?P<test>\S+)") else {
        return Vec::new();
    };
    text.lines()
        .filter_map(|l| re.captures(l))
        .map(|caps| ErrorInfo::error("", format!("{} failed", &caps["test"])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations(errors: &[ErrorInfo]) -> Vec<(String, Option<u32>, Severity)> {
        errors
            .iter()
            .map(|e| (e.file.clone(), e.line, e.severity))
            .collect()
    }

    #[test]
    fn tsc_plain_and_pretty() {
        let out = "src/app.ts(12,5): error TS2322: Type 'string' is not assignable to type 'number'.\n\
                   src/util.ts:3:1 - error TS2304: Cannot find name 'foo'.\n\
                   Found 2 errors.";
        let errors = Tool::Tsc.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("src/app.ts".to_string(), Some(12), Severity::Error),
                ("src/util.ts".to_string(), Some(3), Severity::Error),
            ]
        );
        assert_eq!(errors[0].code.as_deref(), Some("TS2322"));
        assert_eq!(errors[0].column, Some(5));
    }

    #[test]
    fn mypy_json_lines_preferred() {
        let out = r#"{"file": "pkg/a.py", "line": 4, "column": 8, "message": "Incompatible types", "hint": null, "code": "assignment", "severity": "error"}
{"file": "pkg/b.py", "line": 9, "column": 0, "message": "See docs", "hint": null, "code": null, "severity": "note"}"#;
        let errors = Tool::Mypy.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("pkg/a.py".to_string(), Some(4), Severity::Error),
                ("pkg/b.py".to_string(), Some(9), Severity::Note),
            ]
        );
        assert_eq!(errors[0].code.as_deref(), Some("assignment"));
        assert_eq!(errors[1].column, None);
    }

    #[test]
    fn mypy_text() {
        let out = "app/models.py:23: error: Argument 1 has incompatible type \"str\"  [arg-type]\n\
                   app/views.py:7:12: warning: Unused \"type: ignore\" comment\n\
                   Found 1 error in 1 file (checked 4 source files)";
        let errors = Tool::Mypy.parse(out);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code.as_deref(), Some("arg-type"));
        assert_eq!(errors[0].line, Some(23));
        assert_eq!(errors[1].severity, Severity::Warning);
        assert_eq!(errors[1].column, Some(12));
    }

    #[test]
    fn pyright_json_is_one_based() {
        let out = r#"{"version": "1.1.350", "generalDiagnostics": [
            {"file": "src/main.py", "severity": "error", "message": "\"x\" is not defined",
             "range": {"start": {"line": 9, "character": 4}, "end": {"line": 9, "character": 5}},
             "rule": "reportUndefinedVariable"}
        ], "summary": {"errorCount": 1}}"#;
        let errors = Tool::Pyright.parse(out);
        assert_eq!(
            locations(&errors),
            vec![("src/main.py".to_string(), Some(10), Severity::Error)]
        );
        assert_eq!(errors[0].column, Some(5));
        assert_eq!(errors[0].code.as_deref(), Some("reportUndefinedVariable"));
    }

    #[test]
    fn eslint_json() {
        let out = r#"[{"filePath": "src/a.js", "messages": [
            {"ruleId": "no-unused-vars", "severity": 2, "message": "'x' is defined but never used.", "line": 1, "column": 7},
            {"ruleId": "semi", "severity": 1, "message": "Missing semicolon.", "line": 2, "column": 10}
        ], "errorCount": 1, "warningCount": 1},
        {"filePath": "src/b.js", "messages": [], "errorCount": 0}]"#;
        let errors = Tool::Eslint.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("src/a.js".to_string(), Some(1), Severity::Error),
                ("src/a.js".to_string(), Some(2), Severity::Warning),
            ]
        );
    }

    #[test]
    fn eslint_stylish_text() {
        let out = "\n/repo/src/a.js\n  1:7  error  'x' is defined but never used  no-unused-vars\n  2:10  warning  Missing semicolon  semi\n\n✖ 2 problems (1 error, 1 warning)\n";
        let errors = Tool::Eslint.parse(out);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file, "/repo/src/a.js");
        assert_eq!(errors[0].code.as_deref(), Some("no-unused-vars"));
        assert_eq!(errors[1].severity, Severity::Warning);
    }

    #[test]
    fn ruff_json_and_text() {
        let json = r#"[{"code": "F401", "message": "`os` imported but unused", "filename": "pkg/mod.py",
            "location": {"row": 1, "column": 8}, "end_location": {"row": 1, "column": 10}, "fix": null}]"#;
        let errors = Tool::Ruff.parse(json);
        assert_eq!(
            locations(&errors),
            vec![("pkg/mod.py".to_string(), Some(1), Severity::Error)]
        );

        let text = "pkg/mod.py:1:8: F401 [*] `os` imported but unused\nFound 1 error.";
        let errors = Tool::Ruff.parse(text);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "`os` imported but unused");
    }

    #[test]
    fn flake8_warning_codes() {
        let out = "mod.py:3:1: E302 expected 2 blank lines, found 1\nmod.py:9:80: W291 trailing whitespace";
        let errors = Tool::Flake8.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("mod.py".to_string(), Some(3), Severity::Error),
                ("mod.py".to_string(), Some(9), Severity::Warning),
            ]
        );
    }

    #[test]
    fn pytest_short_summary() {
        let out = "\
tests/test_math.py:14: AssertionError
=========================== short test summary info ============================
FAILED tests/test_math.py::test_add - assert 3 == 4
ERROR tests/test_io.py - ModuleNotFoundError: No module named 'missing'
========================= 1 failed, 1 error in 0.12s =========================";
        let errors = Tool::Pytest.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("tests/test_math.py".to_string(), Some(14), Severity::Error),
                ("tests/test_io.py".to_string(), None, Severity::Error),
            ]
        );
        assert_eq!(errors[0].message, "test_add: assert 3 == 4");
    }

    #[test]
    fn jest_json_and_text() {
        let json = r#"{"numFailedTests": 1, "testResults": [{"name": "src/sum.test.js", "status": "failed",
            "assertionResults": [
              {"fullName": "sum adds", "status": "failed", "failureMessages": ["Error: expect(received).toBe(expected)\n\nExpected: 4"], "location": {"line": 5, "column": 3}},
              {"fullName": "sum zero", "status": "passed", "failureMessages": []}
            ]}]}"#;
        let errors = Tool::Jest.parse(json);
        assert_eq!(
            locations(&errors),
            vec![("src/sum.test.js".to_string(), Some(5), Severity::Error)]
        );
        assert!(errors[0].message.starts_with("sum adds: Error"));

        let text = "FAIL src/sum.test.js\n  ● sum › adds\n\n    expect(received).toBe(expected)\n";
        let errors = Tool::Jest.parse(text);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file, "src/sum.test.js");
        assert_eq!(errors[0].message, "sum › adds");
    }

    #[test]
    fn cargo_json_messages() {
        let out = r#"{"reason":"compiler-artifact","package_id":"x"}
{"reason":"compiler-message","message":{"message":"mismatched types","code":{"code":"E0308"},"level":"error","spans":[{"file_name":"src/main.rs","line_start":4,"column_start":18,"is_primary":true}]}}
{"reason":"compiler-message","message":{"message":"unused variable: `y`","code":{"code":"unused_variables"},"level":"warning","spans":[{"file_name":"src/lib.rs","line_start":2,"column_start":9,"is_primary":true}]}}
{"reason":"compiler-message","message":{"message":"aborting due to 1 previous error","code":null,"level":"error","spans":[]}}
{"reason":"build-finished","success":false}"#;
        let errors = Tool::Cargo.parse(out);
        assert_eq!(
            locations(&errors),
            vec![
                ("src/main.rs".to_string(), Some(4), Severity::Error),
                ("src/lib.rs".to_string(), Some(2), Severity::Warning),
            ]
        );
        assert_eq!(errors[0].code.as_deref(), Some("E0308"));
    }

    #[test]
    fn rustc_human_text() {
        let out = "\
error[E0425]: cannot find value `z` in this scope
 --> src/main.rs:3:13
  |
3 |     let x = z;
  |             ^ not found in this scope

error: aborting due to 1 previous error
";
        let errors = Tool::Cargo.parse(out);
        assert_eq!(
            locations(&errors),
            vec![("src/main.rs".to_string(), Some(3), Severity::Error)]
        );
        assert_eq!(errors[0].code.as_deref(), Some("E0425"));
    }

    #[test]
    fn cargo_test_panics() {
        let out = "\
running 2 tests
test tests::adds ... FAILED
test tests::ok ... ok

failures:

---- tests::adds stdout ----
thread 'tests::adds' panicked at src/lib.rs:12:9:
assertion `left == right` failed
  left: 3
 right: 4
";
        let errors = Tool::CargoTest.parse(out);
        assert_eq!(
            locations(&errors),
            vec![("src/lib.rs".to_string(), Some(12), Severity::Error)]
        );
        assert_eq!(
            errors[0].message,
            "tests::adds: assertion `left == right` failed"
        );
    }

    #[test]
    fn go_build_and_test() {
        let build = "# example.com/app\n./main.go:10:2: undefined: foo\n./util.go:4:1: missing return";
        let errors = Tool::Go.parse(build);
        assert_eq!(
            locations(&errors),
            vec![
                ("main.go".to_string(), Some(10), Severity::Error),
                ("util.go".to_string(), Some(4), Severity::Error),
            ]
        );

        let test = "--- FAIL: TestAdd (0.00s)\n    math_test.go:12: expected 4, got 3\nFAIL\nFAIL\texample.com/app\t0.002s";
        let errors = Tool::GoTest.parse(test);
        assert_eq!(
            locations(&errors),
            vec![("math_test.go".to_string(), Some(12), Severity::Error)]
        );
    }

    #[test]
    fn chain_falls_back_to_generic_lines() {
        let out = "building...\nSomething FAILED badly\nfatal error: disk full\n";
        let errors = parse_output(&[Tool::Tsc, Tool::Eslint], out);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.file.is_empty()));
    }

    #[test]
    fn generic_fallback_never_empty_for_output() {
        let errors = generic_fallback("\x1b[31mexit status 3\x1b[0m\n\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "exit status 3");
        assert!(generic_fallback("   \n").is_empty());
    }
}
