//! Changed-file detection against a version-control baseline
//!
//! Answers "what changed since the baseline?" for incremental gates and
//! produces the repository-state fingerprint the gate cache keys on.
//!
//! Every failure here is recoverable: callers treat [`VcsError`] as
//! "incremental mode unavailable" rather than aborting.

use git2::{Delta, Diff, DiffFormat, DiffOptions, Repository, StatusOptions, Tree};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default baseline reference
pub const DEFAULT_BASELINE: &str = "HEAD";

/// Project-local state directory, never reported as a change
pub const STATE_DIR: &str = ".qgate";

/// Placeholder commit id used when the baseline does not exist yet
const EMPTY_BASELINE: &str = "empty-tree";

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),
    #[error("repository has no working directory: {}", .0.display())]
    BareRepository(PathBuf),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Which kinds of change to include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSources {
    pub staged: bool,
    pub unstaged: bool,
    pub untracked: bool,
}

impl Default for ChangeSources {
    fn default() -> Self {
        Self {
            staged: true,
            unstaged: true,
            untracked: true,
        }
    }
}

/// Computes changed files relative to a baseline reference.
#[derive(Debug, Clone)]
pub struct ChangedFilesDetector {
    root: PathBuf,
    baseline: String,
    /// Files (absolute) that never count as a change
    excluded: Vec<PathBuf>,
}

impl ChangedFilesDetector {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            baseline: DEFAULT_BASELINE.to_string(),
            excluded: Vec::new(),
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }

    /// Leave `path` out of change listings and the state hash.
    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// Whether the root sits inside a usable git working tree.
    pub fn is_available(&self) -> bool {
        self.open().is_ok()
    }

    fn open(&self) -> Result<Repository, VcsError> {
        let repo = Repository::discover(&self.root)
            .map_err(|_| VcsError::NotARepository(self.root.clone()))?;
        if repo.workdir().is_none() {
            return Err(VcsError::BareRepository(self.root.clone()));
        }
        Ok(repo)
    }

    /// Baseline tree, or `None` when the reference does not resolve yet
    /// (a repository without commits). Diffing against `None` is diffing
    /// against the empty tree.
    fn baseline_tree<'r>(&self, repo: &'r Repository) -> Option<Tree<'r>> {
        match repo
            .revparse_single(&self.baseline)
            .and_then(|obj| obj.peel_to_tree())
        {
            Ok(tree) => Some(tree),
            Err(err) => {
                tracing::debug!(
                    baseline = %self.baseline,
                    error = %err,
                    "baseline unresolved, diffing against empty tree"
                );
                None
            }
        }
    }

    fn baseline_commit(&self, repo: &Repository) -> String {
        repo.revparse_single(&self.baseline)
            .and_then(|obj| obj.peel_to_commit())
            .map(|commit| commit.id().to_string())
            .unwrap_or_else(|_| EMPTY_BASELINE.to_string())
    }

    fn staged_diff<'r>(&self, repo: &'r Repository) -> Result<Diff<'r>, VcsError> {
        let tree = self.baseline_tree(repo);
        let mut opts = DiffOptions::new();
        Ok(repo.diff_tree_to_index(tree.as_ref(), None, Some(&mut opts))?)
    }

    fn unstaged_diff<'r>(&self, repo: &'r Repository) -> Result<Diff<'r>, VcsError> {
        let mut opts = DiffOptions::new();
        opts.include_untracked(false);
        Ok(repo.diff_index_to_workdir(None, Some(&mut opts))?)
    }

    /// Excluded files as workdir-relative paths. A file whose directory
    /// does not exist yet cannot show up in a diff and is left out.
    fn excluded_repo_paths(&self, repo: &Repository) -> Vec<String> {
        let Some(workdir) = repo.workdir().and_then(|dir| dir.canonicalize().ok()) else {
            return Vec::new();
        };
        self.excluded
            .iter()
            .filter_map(|path| {
                let parent = path.parent()?.canonicalize().ok()?;
                let full = parent.join(path.file_name()?);
                full.strip_prefix(&workdir)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect()
    }

    fn untracked_paths(&self, repo: &Repository) -> Result<Vec<String>, VcsError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        let mut out: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status().is_wt_new())
            .filter_map(|entry| entry.path().map(str::to_string))
            .filter(|path| !is_state_path(path))
            .collect();
        out.sort();
        Ok(out)
    }

    /// Union of the requested change sources, de-duplicated and sorted.
    ///
    /// Paths are relative to the detector root; changes outside it and
    /// deletions are left out.
    pub fn changed_files(&self, sources: ChangeSources) -> Result<Vec<String>, VcsError> {
        let repo = self.open()?;
        let mut repo_paths: BTreeSet<String> = BTreeSet::new();

        if sources.staged {
            repo_paths.extend(live_paths(&self.staged_diff(&repo)?));
        }
        if sources.unstaged {
            repo_paths.extend(live_paths(&self.unstaged_diff(&repo)?));
        }
        if sources.untracked {
            repo_paths.extend(self.untracked_paths(&repo)?);
        }

        let prefix = self.root_prefix(&repo);
        let excluded = self.excluded_repo_paths(&repo);
        Ok(repo_paths
            .into_iter()
            .filter(|path| !is_state_path(path) && !excluded.contains(path))
            .filter_map(|path| relative_to_prefix(&path, prefix.as_deref()))
            .collect())
    }

    /// Changed files whose extension is in `extensions`.
    ///
    /// Extensions are compared case-insensitively and may be given with or
    /// without the leading dot.
    pub fn changed_files_by_extension(&self, extensions: &[&str]) -> Result<Vec<String>, VcsError> {
        let wanted: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
        let files = self.changed_files(ChangeSources::default())?;
        Ok(files
            .into_iter()
            .filter(|file| {
                file_extension(file)
                    .map(|ext| wanted.contains(&ext))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Fingerprint of the current repository state.
    ///
    /// Combines the baseline commit with digests of the staged patch and
    /// the unstaged patch. Any edit to a tracked or staged file (even one
    /// that keeps line counts) produces a different value. Untracked files
    /// are not part of it: tools leave build output and caches behind.
    pub fn compute_tree_hash(&self) -> Result<String, VcsError> {
        let repo = self.open()?;
        let excluded = self.excluded_repo_paths(&repo);
        let commit = self.baseline_commit(&repo);
        let staged = digest_diff(&self.staged_diff(&repo)?, &excluded)?;
        let unstaged = digest_diff(&self.unstaged_diff(&repo)?, &excluded)?;

        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", commit, staged, unstaged).as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Root location relative to the repository workdir, `None` when they match.
    fn root_prefix(&self, repo: &Repository) -> Option<PathBuf> {
        let workdir = repo.workdir()?.canonicalize().ok()?;
        let root = self.root.canonicalize().ok()?;
        let prefix = root.strip_prefix(&workdir).ok()?.to_path_buf();
        if prefix.as_os_str().is_empty() {
            None
        } else {
            Some(prefix)
        }
    }

    /// Existing test files that conventionally cover `changed`.
    ///
    /// Candidates per source `dir/name.ext`: `dir/test_name.ext`,
    /// `dir/name_test.ext`, `dir/name.test.ext`, `dir/name.spec.ext`,
    /// `tests/test_name.ext` and `tests/<dir>/test_name.ext`. A changed file
    /// that already is a test file maps to itself.
    pub fn infer_test_files_for_changes(&self, changed: &[String]) -> Vec<String> {
        let mut found: BTreeSet<String> = BTreeSet::new();
        for file in changed {
            for candidate in test_candidates(file) {
                if self.root.join(&candidate).is_file() {
                    found.insert(candidate);
                }
            }
        }
        found.into_iter().collect()
    }
}

fn test_candidates(file: &str) -> Vec<String> {
    let path = Path::new(file);
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    if is_test_file(name, stem) {
        return vec![file.to_string()];
    }

    let join = |dir: &str, file: String| -> String {
        if dir.is_empty() {
            file
        } else {
            format!("{}/{}", dir.trim_end_matches('/'), file)
        }
    };

    let test_name = format!("test_{}", name);
    let mut out = vec![join(&dir, test_name.clone())];
    if let Some(ext) = ext {
        out.push(join(&dir, format!("{}_test.{}", stem, ext)));
        out.push(join(&dir, format!("{}.test.{}", stem, ext)));
        out.push(join(&dir, format!("{}.spec.{}", stem, ext)));
    }
    out.push(format!("tests/{}", test_name));
    if !dir.is_empty() {
        out.push(format!("tests/{}/{}", dir, test_name));
        if let Some(rest) = dir.strip_prefix("src/") {
            out.push(format!("tests/{}/{}", rest, test_name));
        }
    }
    out
}

fn is_test_file(name: &str, stem: &str) -> bool {
    name.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
}

/// Paths touched by a diff, excluding deletions.
fn live_paths(diff: &Diff<'_>) -> Vec<String> {
    diff.deltas()
        .filter(|delta| delta.status() != Delta::Deleted)
        .filter_map(|delta| delta.new_file().path().map(|p| p.to_string_lossy().into_owned()))
        .collect()
}

fn digest_diff(diff: &Diff<'_>, excluded: &[String]) -> Result<String, VcsError> {
    let mut hasher = Sha256::new();
    diff.print(DiffFormat::Patch, |delta, _hunk, line| {
        if let Some(path) = delta.new_file().path() {
            let path = path.to_string_lossy().replace('\\', "/");
            if is_state_path(&path) || excluded.contains(&path) {
                return true;
            }
        }
        hasher.update([line.origin() as u8]);
        hasher.update(line.content());
        true
    })?;
    Ok(hex::encode(hasher.finalize()))
}

fn is_state_path(path: &str) -> bool {
    path == STATE_DIR || path.starts_with(&format!("{}/", STATE_DIR))
}

fn relative_to_prefix(repo_path: &str, prefix: Option<&Path>) -> Option<String> {
    match prefix {
        None => Some(repo_path.to_string()),
        Some(prefix) => Path::new(repo_path)
            .strip_prefix(prefix)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/")),
    }
}

/// Lower-case an extension and make sure it carries a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

fn file_extension(file: &str) -> Option<String> {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
}
