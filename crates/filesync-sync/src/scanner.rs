//! Source tree enumeration
//!
//! The [`Scanner`] walks a source root recursively and yields a
//! [`CandidateFile`] for every regular file whose name matches the
//! configured [`PatternSet`]. The walk is lazy; calling
//! [`scan`](Scanner::scan) again starts a fresh enumeration.
//!
//! Files that exist only in the replica are never looked at: the sync
//! is one-directional.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::pattern::PatternSet;
use crate::{SyncError, HISTORY_DIR, TEMP_SUFFIX};

// ============================================================================
// CandidateFile
// ============================================================================

/// A file in the source tree that may need copying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Path relative to the source root
    pub relative_path: PathBuf,
    /// Absolute path of the source file
    pub source_path: PathBuf,
    /// Size in bytes when scanned
    pub size: u64,
    /// Modification time when scanned
    pub modified: SystemTime,
}

impl CandidateFile {
    /// Relative path with `/` separators, for status and logs
    pub fn display_path(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Where this file lives inside `replica_root`
    pub fn replica_path(&self, replica_root: &Path) -> PathBuf {
        replica_root.join(&self.relative_path)
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Enumerates matching files under a source root
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    patterns: PatternSet,
    excluded: Vec<PathBuf>,
}

impl Scanner {
    /// Creates a scanner for `root` filtering names with `pattern`
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidPattern`] if the pattern does not compile.
    pub fn new(root: impl Into<PathBuf>, pattern: &str) -> Result<Self, SyncError> {
        Ok(Self {
            root: root.into(),
            patterns: PatternSet::parse(pattern)?,
            excluded: Vec::new(),
        })
    }

    /// Skips everything under `dir`
    ///
    /// Used to keep a replica nested inside its own source out of the scan.
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    /// The configured source root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The compiled name patterns
    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Fails with [`SyncError::SourceUnavailable`] unless the root is a directory
    pub fn check_root(&self) -> Result<PathBuf, SyncError> {
        match std::fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => self
                .root
                .canonicalize()
                .map_err(|_| SyncError::SourceUnavailable(self.root.clone())),
            _ => Err(SyncError::SourceUnavailable(self.root.clone())),
        }
    }

    /// Starts a lazy enumeration of matching files
    ///
    /// # Errors
    /// Returns [`SyncError::SourceUnavailable`] if the root does not exist
    /// or is not a directory.
    pub fn scan(&self) -> Result<ScanIter<'_>, SyncError> {
        let root = self.check_root()?;
        let excluded: Vec<PathBuf> = self
            .excluded
            .iter()
            .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()))
            .collect();

        debug!(root = %root.display(), pattern = self.patterns.as_str(), "Scanning source");

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| !is_history_dir(entry) && !is_excluded(entry, &excluded));

        Ok(ScanIter {
            scanner: self,
            root,
            inner: Box::new(walker),
        })
    }

    /// Collects every candidate, ordered by relative path
    pub fn collect_sorted(&self) -> Result<Vec<CandidateFile>, SyncError> {
        let mut candidates: Vec<CandidateFile> = self.scan()?.collect();
        candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(candidates)
    }
}

/// The root-level history directory belongs to the replica format
fn is_history_dir(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == HISTORY_DIR
}

fn is_excluded(entry: &DirEntry, excluded: &[PathBuf]) -> bool {
    entry.file_type().is_dir() && excluded.iter().any(|dir| entry.path() == dir.as_path())
}

// ============================================================================
// ScanIter
// ============================================================================

/// Lazy iterator over the candidates of one scan
pub struct ScanIter<'a> {
    scanner: &'a Scanner,
    root: PathBuf,
    inner: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send + 'a>,
}

impl Iterator for ScanIter<'_> {
    type Item = CandidateFile;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        path = ?err.path(),
                        error = %err,
                        "Skipping unreadable entry during scan"
                    );
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.ends_with(TEMP_SUFFIX) || !self.scanner.patterns.matches(&name) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "Cannot stat file");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "No modification time");
                    continue;
                }
            };
            let relative_path = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };

            return Some(CandidateFile {
                relative_path,
                source_path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified,
            });
        }
    }
}
