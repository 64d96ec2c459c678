//! Gate result cache
//!
//! Results are keyed on gate name and stored together with the repository
//! state hash they were computed under. A lookup only hits when that hash
//! still matches and the entry has not expired.
//!
//! The whole document is read once on open and rewritten on every
//! mutation. Storage failures never surface as errors to the orchestrator:
//! reads degrade to misses and writes to warnings.

mod store;

pub use store::{CacheDocument, CACHE_VERSION};

use crate::changed_files::{ChangedFilesDetector, STATE_DIR};
use crate::output::GateOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Cache document file name inside the state directory
pub const CACHE_FILE: &str = "gate_cache.json";

/// Default cache location for a project
pub fn default_cache_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join(CACHE_FILE)
}

/// A persisted gate result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tree_hash: String,
    pub gate_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub output: GateOutput,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("repository state unavailable: {0}")]
    StateUnavailable(String),
    #[error("failed to write gate cache {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode gate cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a lookup missed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired,
    HashMismatch,
    /// Not in a repository, so no state hash to compare against
    StateUnavailable,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MissReason::Absent => "no entry",
            MissReason::Expired => "entry expired",
            MissReason::HashMismatch => "repository changed",
            MissReason::StateUnavailable => "repository state unavailable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(GateOutput),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn hit(self) -> Option<GateOutput> {
        match self {
            CacheLookup::Hit(output) => Some(output),
            CacheLookup::Miss(_) => None,
        }
    }
}

/// Cache of gate outputs for one project.
pub struct GateCache {
    path: PathBuf,
    detector: ChangedFilesDetector,
    entries: BTreeMap<String, CacheEntry>,
    /// Memoized state hash, or why it could not be computed
    tree_hash: Option<Result<String, String>>,
}

impl GateCache {
    /// Open the cache at the default location under `project_root`.
    pub fn open(project_root: &Path) -> Self {
        Self::open_at(
            default_cache_path(project_root),
            ChangedFilesDetector::new(project_root),
        )
    }

    /// Open a cache document at `path`, hashing state with `detector`.
    pub fn open_at(path: impl Into<PathBuf>, detector: ChangedFilesDetector) -> Self {
        let path = path.into();
        let entries = store::read_entries(&path)
            .into_iter()
            .map(|entry| (entry.gate_name.clone(), entry))
            .collect::<BTreeMap<_, _>>();
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened gate cache");
        Self {
            path,
            detector,
            entries,
            tree_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current repository state hash, computed once per instance.
    pub fn current_hash(&mut self) -> Option<&str> {
        self.state_hash().ok()
    }

    fn state_hash(&mut self) -> Result<&str, CacheError> {
        if self.tree_hash.is_none() {
            let computed = self.detector.compute_tree_hash().map_err(|err| {
                tracing::debug!(error = %err, "no repository state hash, cache disabled");
                err.to_string()
            });
            self.tree_hash = Some(computed);
        }
        match &self.tree_hash {
            Some(Ok(hash)) => Ok(hash.as_str()),
            Some(Err(message)) => Err(CacheError::StateUnavailable(message.clone())),
            None => Err(CacheError::StateUnavailable(String::from("not computed"))),
        }
    }

    /// Forget the memoized hash so the next lookup recomputes it.
    pub fn invalidate_hash(&mut self) {
        self.tree_hash = None;
    }

    /// Recompute the state hash now; lookups and writes until the next
    /// refresh are keyed on this value.
    pub fn refresh_hash(&mut self) -> Option<&str> {
        self.invalidate_hash();
        self.current_hash()
    }

    /// Cached output for `gate_name` if it is still valid.
    pub fn get(&mut self, gate_name: &str) -> CacheLookup {
        let (expired, stored) = match self.entries.get(gate_name) {
            Some(entry) => (entry.is_expired(Utc::now()), entry.tree_hash.clone()),
            None => return CacheLookup::Miss(MissReason::Absent),
        };

        if expired {
            self.entries.remove(gate_name);
            if let Err(err) = self.persist() {
                tracing::warn!(error = %err, "failed to drop expired gate cache entry");
            }
            return CacheLookup::Miss(MissReason::Expired);
        }

        match self.current_hash() {
            None => return CacheLookup::Miss(MissReason::StateUnavailable),
            Some(current) if current != stored => {
                return CacheLookup::Miss(MissReason::HashMismatch)
            }
            Some(_) => {}
        }

        match self.entries.get(gate_name) {
            Some(entry) => CacheLookup::Hit(entry.output.as_cached()),
            None => CacheLookup::Miss(MissReason::Absent),
        }
    }

    /// Store `output` under the current state hash.
    pub fn set(
        &mut self,
        gate_name: &str,
        output: &GateOutput,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let tree_hash = self.state_hash()?.to_string();
        let created_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| created_at + ttl);
        let output = GateOutput {
            from_cache: false,
            ..output.clone()
        };
        self.entries.insert(
            gate_name.to_string(),
            CacheEntry {
                tree_hash,
                gate_name: gate_name.to_string(),
                created_at,
                expires_at,
                output,
            },
        );
        self.persist()
    }

    /// Remove the entry for `gate_name`, or every entry when `None`.
    pub fn invalidate(&mut self, gate_name: Option<&str>) -> Result<(), CacheError> {
        match gate_name {
            Some(name) => {
                if self.entries.remove(name).is_none() {
                    return Ok(());
                }
            }
            None => self.entries.clear(),
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), CacheError> {
        let entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        store::write_entries(&self.path, &entries)
    }
}
