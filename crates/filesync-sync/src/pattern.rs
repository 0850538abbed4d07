//! File name patterns
//!
//! A configuration's pattern is a comma-separated list of globs matched
//! case-insensitively against the file *name* (not the full path), so
//! `*.BAK, db_*.zip` matches `nightly.bak` in any subdirectory.

use glob::{MatchOptions, Pattern};

use filesync_core::domain::DEFAULT_PATTERN;

use crate::SyncError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled set of name globs
#[derive(Debug, Clone)]
pub struct PatternSet {
    source: String,
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compiles a comma-separated pattern list
    ///
    /// Blank entries are ignored; an entirely blank list means `*`.
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidPattern`] for the first glob that fails
    /// to compile.
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let mut parts: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            parts.push(DEFAULT_PATTERN);
        }

        let patterns = parts
            .iter()
            .map(|part| {
                Pattern::new(part).map_err(|e| SyncError::InvalidPattern {
                    pattern: (*part).to_string(),
                    message: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: parts.join(", "),
            patterns,
        })
    }

    /// True if `file_name` matches any glob in the set
    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(file_name, MATCH_OPTIONS))
    }

    /// The normalized textual form, e.g. `"*.bak, *.zip"`
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
