//! Project ecosystem detection
//!
//! Looks for marker files at the root and in a fixed set of conventional
//! subdirectories so monorepos with e.g. a Node frontend and a Python
//! backend are recognized as both.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Subdirectories scanned in addition to the root
pub const CONVENTIONAL_SUBDIRS: &[&str] = &[
    "frontend", "backend", "web", "api", "server", "client", "app", "src",
];

/// Detected project ecosystem.
///
/// Declaration order is the canonical reporting order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Nodejs,
    Python,
    Rust,
    Go,
    #[default]
    Unknown,
}

impl ProjectType {
    /// Real ecosystems in canonical order
    pub const KNOWN: [ProjectType; 4] = [
        ProjectType::Nodejs,
        ProjectType::Python,
        ProjectType::Rust,
        ProjectType::Go,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProjectType::Nodejs => "Node.js",
            ProjectType::Python => "Python",
            ProjectType::Rust => "Rust",
            ProjectType::Go => "Go",
            ProjectType::Unknown => "Unknown",
        }
    }

    /// Identifier used in config files and gate-name suffixes
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Nodejs => "nodejs",
            ProjectType::Python => "python",
            ProjectType::Rust => "rust",
            ProjectType::Go => "go",
            ProjectType::Unknown => "unknown",
        }
    }

    /// Files whose presence marks a directory as this ecosystem
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            ProjectType::Nodejs => &["package.json"],
            ProjectType::Python => &[
                "pyproject.toml",
                "setup.py",
                "setup.cfg",
                "requirements.txt",
                "Pipfile",
            ],
            ProjectType::Rust => &["Cargo.toml"],
            ProjectType::Go => &["go.mod"],
            ProjectType::Unknown => &[],
        }
    }

    /// Source extensions considered by incremental gates
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ProjectType::Nodejs => &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"],
            ProjectType::Python => &[".py", ".pyi"],
            ProjectType::Rust => &[".rs"],
            ProjectType::Go => &[".go"],
            ProjectType::Unknown => &[],
        }
    }

    pub fn is_known(&self) -> bool {
        *self != ProjectType::Unknown
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nodejs" | "node" | "javascript" | "typescript" => Ok(ProjectType::Nodejs),
            "python" => Ok(ProjectType::Python),
            "rust" => Ok(ProjectType::Rust),
            "go" | "golang" => Ok(ProjectType::Go),
            "unknown" => Ok(ProjectType::Unknown),
            other => Err(format!("unknown project type '{}'", other)),
        }
    }
}

/// Result of scanning a project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDetection {
    /// Detected types in canonical order, or `[Unknown]`
    pub types: Vec<ProjectType>,
    /// Directory (relative to the root, empty for the root itself) where
    /// each type was first found
    pub locations: BTreeMap<ProjectType, PathBuf>,
}

impl ProjectDetection {
    /// Types other than `Unknown`
    pub fn known_types(&self) -> Vec<ProjectType> {
        self.types.iter().copied().filter(|t| t.is_known()).collect()
    }

    pub fn is_mixed(&self) -> bool {
        self.known_types().len() > 1
    }

    pub fn primary(&self) -> ProjectType {
        self.types.first().copied().unwrap_or_default()
    }

    pub fn location(&self, project_type: ProjectType) -> Option<&Path> {
        self.locations.get(&project_type).map(PathBuf::as_path)
    }
}

fn has_marker(dir: &Path, project_type: ProjectType) -> bool {
    project_type
        .markers()
        .iter()
        .any(|marker| dir.join(marker).is_file())
}

/// Scan `root` and its conventional subdirectories for marker files.
pub fn detect_project(root: &Path) -> ProjectDetection {
    let mut locations: BTreeMap<ProjectType, PathBuf> = BTreeMap::new();

    let candidates = std::iter::once(PathBuf::new())
        .chain(CONVENTIONAL_SUBDIRS.iter().map(PathBuf::from));
    for relative in candidates {
        let dir = root.join(&relative);
        if !dir.is_dir() {
            continue;
        }
        for project_type in ProjectType::KNOWN {
            if has_marker(&dir, project_type) {
                locations.entry(project_type).or_insert_with(|| relative.clone());
            }
        }
    }

    let mut types: Vec<ProjectType> = locations.keys().copied().collect();
    if types.is_empty() {
        types.push(ProjectType::Unknown);
    }
    tracing::debug!(root = %root.display(), types = ?types, "detected project types");

    ProjectDetection { types, locations }
}

/// Ordered list of detected project types, `[Unknown]` when none match.
pub fn detect_project_types(root: &Path) -> Vec<ProjectType> {
    detect_project(root).types
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_directory_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project_types(dir.path()), vec![ProjectType::Unknown]);
    }

    #[test]
    fn root_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let detection = detect_project(dir.path());
        assert_eq!(detection.types, vec![ProjectType::Rust]);
        assert_eq!(detection.location(ProjectType::Rust), Some(Path::new("")));
        assert!(!detection.is_mixed());
    }

    #[test]
    fn mixed_layout_in_canonical_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        fs::create_dir_all(dir.path().join("frontend")).unwrap();
        fs::write(dir.path().join("backend/pyproject.toml"), "").unwrap();
        fs::write(dir.path().join("frontend/package.json"), "{}").unwrap();

        let detection = detect_project(dir.path());
        assert_eq!(
            detection.types,
            vec![ProjectType::Nodejs, ProjectType::Python]
        );
        assert_eq!(
            detection.location(ProjectType::Python),
            Some(Path::new("backend"))
        );
        assert!(detection.is_mixed());
    }

    #[test]
    fn root_location_wins_over_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("server")).unwrap();
        fs::write(dir.path().join("go.mod"), "module x\n").unwrap();
        fs::write(dir.path().join("server/go.mod"), "module y\n").unwrap();
        let detection = detect_project(dir.path());
        assert_eq!(detection.location(ProjectType::Go), Some(Path::new("")));
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("node".parse::<ProjectType>().unwrap(), ProjectType::Nodejs);
        assert_eq!("Golang".parse::<ProjectType>().unwrap(), ProjectType::Go);
        assert!("cobol".parse::<ProjectType>().is_err());
    }
}
