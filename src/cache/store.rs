//! On-disk cache document

use super::{CacheEntry, CacheError};
use crate::changed_files::STATE_DIR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Bump when the document layout changes; older documents are discarded.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDocument {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

impl CacheDocument {
    pub fn new(entries: Vec<CacheEntry>) -> Self {
        Self {
            version: CACHE_VERSION,
            last_updated: Utc::now(),
            entries,
        }
    }
}

/// Read the document; missing, unreadable, corrupt or outdated files
/// all read as empty.
pub fn read_entries(path: &Path) -> Vec<CacheEntry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "gate cache unreadable, starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_str::<CacheDocument>(&content) {
        Ok(doc) if doc.version == CACHE_VERSION => doc.entries,
        Ok(doc) => {
            tracing::debug!(version = doc.version, "gate cache version changed, starting empty");
            Vec::new()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "gate cache corrupt, starting empty");
            Vec::new()
        }
    }
}

/// Rewrite the whole document.
pub fn write_entries(path: &Path, entries: &[CacheEntry]) -> Result<(), CacheError> {
    let write_err = |source: io::Error| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(write_err)?;
            if dir.file_name().and_then(|n| n.to_str()) == Some(STATE_DIR) {
                if let Err(err) = ensure_state_dir_ignored(dir) {
                    tracing::debug!(error = %err, "could not register state dir as ignored");
                }
            }
        }
    }
    let content = serde_json::to_string_pretty(&CacheDocument::new(entries.to_vec()))?;
    write_atomic(path, &content).map_err(write_err)
}

/// Keep the state directory out of `git status`.
///
/// Prefers `.git/info/exclude` so no tracked file changes; falls back to
/// `.gitignore` beside the state directory.
fn ensure_state_dir_ignored(state_dir: &Path) -> io::Result<()> {
    let Some(project_root) = state_dir.parent() else {
        return Ok(());
    };
    let entry = format!("{}/", STATE_DIR);

    if let Ok(repo) = git2::Repository::discover(project_root) {
        let exclude = repo.path().join("info").join("exclude");
        if let Some(parent) = exclude.parent() {
            if fs::create_dir_all(parent).is_ok() && append_ignore_entry(&exclude, &entry).is_ok() {
                return Ok(());
            }
        }
    }

    append_ignore_entry(&project_root.join(".gitignore"), &entry)
}

fn append_ignore_entry(path: &Path, entry: &str) -> io::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let bare = entry.trim_end_matches('/');
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == bare
    });
    if already_present {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    use std::io::Write;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# quality gate cache")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}

/// Write via a temp file and rename.
///
/// On Windows `rename` fails when the destination exists, so the old file
/// is moved aside first; a crash in between leaves a `.bak` behind.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600));
    }

    #[cfg(windows)]
    {
        let backup_path = path.with_extension("bak");
        if backup_path.exists() {
            let _ = fs::remove_file(&backup_path);
        }
        if path.exists() {
            if let Err(err) = fs::rename(path, &backup_path) {
                let _ = fs::remove_file(&tmp_path);
                return Err(err);
            }
        }
        if let Err(err) = fs::rename(&tmp_path, path) {
            if backup_path.exists() {
                let _ = fs::rename(&backup_path, path);
            }
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        let _ = fs::remove_file(&backup_path);
        return Ok(());
    }

    #[cfg(not(windows))]
    {
        fs::rename(&tmp_path, path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp_path);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_repo;

    #[test]
    fn ignore_entry_is_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".gitignore");
        fs::write(&path, "target").unwrap();
        append_ignore_entry(&path, ".qgate/").unwrap();
        append_ignore_entry(&path, ".qgate/").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(".qgate/").count(), 1);
        assert!(content.starts_with("target\n"));
    }

    #[test]
    fn state_dir_goes_to_info_exclude_inside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let path = dir.path().join(STATE_DIR).join("gate_cache.json");
        write_entries(&path, &[]).unwrap();

        let exclude = fs::read_to_string(dir.path().join(".git/info/exclude")).unwrap();
        assert!(exclude.lines().any(|l| l == ".qgate/"));
        assert!(!dir.path().join(".gitignore").exists());
    }

    #[test]
    fn outdated_version_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{"version": 0, "last_updated": "2024-01-01T00:00:00Z", "entries": []}"#,
        )
        .unwrap();
        assert!(read_entries(&path).is_empty());
    }
}
