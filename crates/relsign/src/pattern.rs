#![forbid(unsafe_code)]

//! Path-glob matching for archive and entry names.
//!
//! `*` and `?` never match `/`, so `pkg/tool/*/*` matches exactly two path
//! segments below `pkg/tool`. Matching is case-sensitive and anchored to the
//! whole name.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};

use crate::error::ConfigError;

/// A compiled glob pattern.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// Matches `name` against `pattern` without keeping the compiled form around.
pub fn matches(pattern: &str, name: &str) -> Result<bool, ConfigError> {
    Ok(Pattern::new(pattern)?.is_match(name))
}
