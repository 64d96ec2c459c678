//! Built-in commands per gate type and ecosystem
//!
//! Each (gate type, project type) pair has an ordered candidate list:
//! the primary command first, then fallbacks tried only when the previous
//! program could not be found.

use crate::config::GateType;
use crate::parsers::Tool;
use crate::project::ProjectType;
use std::collections::BTreeSet;
use std::path::Path;

/// How a command narrows to a set of files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScope {
    /// Always runs against the whole project
    Project,
    /// File paths replace `target`, or are appended when there is none
    Files { target: Option<&'static str> },
    /// Package directories (`./pkg`) replace `target`
    Packages { target: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub argv: Vec<String>,
    pub scope: FileScope,
    /// Inserted before appended file arguments (`npm test -- a.test.js`)
    pub separator: Option<&'static str>,
    /// Extra arguments asking a test runner to re-run only failed tests
    pub rerun_failed: Option<&'static [&'static str]>,
}

impl CommandTemplate {
    fn new(argv: &[&str], scope: FileScope) -> Self {
        Self {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            scope,
            separator: None,
            rerun_failed: None,
        }
    }

    fn separator(mut self, separator: &'static str) -> Self {
        self.separator = Some(separator);
        self
    }

    fn rerun_failed(mut self, args: &'static [&'static str]) -> Self {
        self.rerun_failed = Some(args);
        self
    }

    /// Operator override: run exactly this, never narrowed.
    ///
    /// A command given without separate args is split on whitespace.
    pub fn from_override(command: &str, args: &[String]) -> Self {
        let argv = if args.is_empty() {
            command.split_whitespace().map(str::to_string).collect()
        } else {
            std::iter::once(command.to_string())
                .chain(args.iter().cloned())
                .collect()
        };
        Self {
            argv,
            scope: FileScope::Project,
            separator: None,
            rerun_failed: None,
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn narrows(&self) -> bool {
        self.scope != FileScope::Project
    }

    /// Argv for the whole project, or narrowed to `files` when given and supported.
    pub fn render(&self, files: Option<&[String]>) -> Vec<String> {
        let Some(files) = files else {
            return self.argv.clone();
        };
        match self.scope {
            FileScope::Project => self.argv.clone(),
            FileScope::Files { target } => self.substitute(target, files),
            FileScope::Packages { target } => {
                let packages = package_dirs(files);
                self.substitute(Some(target), &packages)
            }
        }
    }

    /// Argv asking the runner to re-run previous failures, if it can.
    pub fn render_rerun_failed(&self) -> Option<Vec<String>> {
        let extra = self.rerun_failed?;
        let mut argv = self.argv.clone();
        if let Some(sep) = self.separator {
            argv.push(sep.to_string());
        }
        argv.extend(extra.iter().map(|s| s.to_string()));
        Some(argv)
    }

    fn substitute(&self, target: Option<&str>, files: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.argv.len() + files.len() + 1);
        let mut replaced = false;
        for arg in &self.argv {
            if !replaced && Some(arg.as_str()) == target {
                argv.extend(files.iter().cloned());
                replaced = true;
            } else {
                argv.push(arg.clone());
            }
        }
        if !replaced {
            if let Some(sep) = self.separator {
                argv.push(sep.to_string());
            }
            argv.extend(files.iter().cloned());
        }
        argv
    }
}

/// `./dir` for every distinct parent directory of `files`.
fn package_dirs(files: &[String]) -> Vec<String> {
    let dirs: BTreeSet<String> = files
        .iter()
        .map(|file| {
            let parent = Path::new(file)
                .parent()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if parent.is_empty() {
                ".".to_string()
            } else {
                format!("./{}", parent)
            }
        })
        .collect();
    dirs.into_iter().collect()
}

/// Candidate commands in evaluation order; empty when there is no built-in.
pub fn candidates(gate_type: GateType, project_type: ProjectType) -> Vec<CommandTemplate> {
    use FileScope::*;
    use GateType::*;
    use ProjectType as P;

    match (gate_type, project_type) {
        (Typecheck, P::Nodejs) => vec![
            CommandTemplate::new(
                &["npx", "--no-install", "tsc", "--noEmit", "--pretty", "false"],
                Files { target: None },
            ),
            CommandTemplate::new(&["tsc", "--noEmit", "--pretty", "false"], Files { target: None }),
        ],
        (Typecheck, P::Python) => vec![
            CommandTemplate::new(
                &["mypy", "--output", "json", "--no-error-summary", "."],
                Files { target: Some(".") },
            ),
            CommandTemplate::new(
                &["python", "-m", "mypy", "--output", "json", "--no-error-summary", "."],
                Files { target: Some(".") },
            ),
            CommandTemplate::new(&["pyright", "--outputjson", "."], Files { target: Some(".") }),
        ],
        (Typecheck, P::Rust) => vec![CommandTemplate::new(
            &["cargo", "check", "--all-targets", "--message-format=json"],
            Project,
        )],
        (Typecheck, P::Go) => vec![CommandTemplate::new(
            &["go", "build", "./..."],
            Packages { target: "./..." },
        )],

        (Test, P::Nodejs) => vec![CommandTemplate::new(
            &["npm", "test", "--silent"],
            Files { target: None },
        )
        .separator("--")
        .rerun_failed(&["--onlyFailures"])],
        (Test, P::Python) => vec![
            CommandTemplate::new(&["pytest", "-q"], Files { target: None }).rerun_failed(&["--lf"]),
            CommandTemplate::new(&["python", "-m", "pytest", "-q"], Files { target: None })
                .rerun_failed(&["--lf"]),
        ],
        (Test, P::Rust) => vec![CommandTemplate::new(&["cargo", "test"], Project)],
        (Test, P::Go) => vec![CommandTemplate::new(
            &["go", "test", "./..."],
            Packages { target: "./..." },
        )],

        (Lint, P::Nodejs) => vec![
            CommandTemplate::new(
                &["npx", "--no-install", "eslint", "--format", "json", "."],
                Files { target: Some(".") },
            ),
            CommandTemplate::new(&["eslint", "--format", "json", "."], Files { target: Some(".") }),
        ],
        (Lint, P::Python) => vec![
            CommandTemplate::new(
                &["ruff", "check", "--output-format", "json", "."],
                Files { target: Some(".") },
            ),
            CommandTemplate::new(&["flake8", "."], Files { target: Some(".") }),
        ],
        (Lint, P::Rust) => vec![CommandTemplate::new(
            &["cargo", "clippy", "--all-targets", "--message-format=json"],
            Project,
        )],
        (Lint, P::Go) => vec![
            CommandTemplate::new(&["golangci-lint", "run", "./..."], Packages { target: "./..." }),
            CommandTemplate::new(&["go", "vet", "./..."], Packages { target: "./..." }),
        ],

        (Custom, _) | (_, P::Unknown) => Vec::new(),
    }
}

/// Parsers to try on a failing gate's output, most specific first.
pub fn parser_chain(gate_type: GateType, project_type: ProjectType) -> &'static [Tool] {
    use GateType::*;
    use ProjectType as P;

    match (gate_type, project_type) {
        (Typecheck, P::Nodejs) => &[Tool::Tsc],
        (Typecheck, P::Python) => &[Tool::Mypy, Tool::Pyright],
        (Typecheck, P::Rust) | (Lint, P::Rust) => &[Tool::Cargo],
        (Typecheck, P::Go) | (Lint, P::Go) => &[Tool::Go],
        (Test, P::Nodejs) => &[Tool::Jest],
        (Test, P::Python) => &[Tool::Pytest],
        (Test, P::Rust) => &[Tool::CargoTest, Tool::Cargo],
        (Test, P::Go) => &[Tool::GoTest, Tool::Go],
        (Lint, P::Nodejs) => &[Tool::Eslint],
        (Lint, P::Python) => &[Tool::Ruff, Tool::Flake8],
        (Custom, _) | (_, P::Unknown) => &[],
    }
}
