//! Repository scopes encoded in key comments
//!
//! Comments travel with `_` standing in for `/`, so `teamA_repoX` is the
//! scope `teamA/repoX`.
//!
//! Any comment with `_` or `/` and no `@` or whitespace is a scope. That
//! includes names like `id_rsa` and the file paths `ssh-add` uses as
//! comments, so such keys are only offered for the matching repository.
//! Re-comment them as `user@host` to keep them unscoped.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};

/// Separator used for `/` inside key comments
const TRANSPORT_SEPARATOR: char = '_';

#[derive(Debug, Clone)]
enum MatchType {
    /// Repository equal to or below this path
    Path(String),
    /// Every repository under this prefix (scope ended in `/`)
    Prefix(String),
    /// Glob over repository paths, `*` does not cross `/`
    Glob(GlobMatcher),
}

/// Authorization scope of one identity
#[derive(Debug, Clone)]
pub struct ScopePath {
    /// Decoded scope as written by the key owner
    pattern: String,
    match_type: MatchType,
}

impl ScopePath {
    /// Decode a key comment
    ///
    /// Returns `Ok(None)` when the comment carries no restrictive scope
    /// (for example `user@host` or a plain name).
    pub fn from_comment(comment: &str) -> Result<Option<Self>> {
        let decoded = comment.replace(TRANSPORT_SEPARATOR, "/");
        if !decoded.contains('/') || decoded.contains('@') || decoded.contains(char::is_whitespace)
        {
            return Ok(None);
        }
        Self::new(&decoded).map(Some)
    }

    /// Build a scope from an already decoded path
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches('/');
        let match_type = if trimmed.contains(['*', '?', '[']) {
            let glob = GlobBuilder::new(trimmed)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::Scope(format!("Invalid scope glob '{}': {}", pattern, e)))?;
            MatchType::Glob(glob.compile_matcher())
        } else if let Some(prefix) = trimmed.strip_suffix('/') {
            MatchType::Prefix(prefix.to_string())
        } else {
            MatchType::Path(trimmed.to_string())
        };

        Ok(Self {
            pattern: pattern.to_string(),
            match_type,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this scope grants access to `repository`
    pub fn authorizes(&self, repository: &str) -> bool {
        let repository = repository.trim_start_matches('/');
        match &self.match_type {
            MatchType::Path(path) => is_same_or_below(repository, path),
            MatchType::Prefix(prefix) => {
                prefix.is_empty() || repository.starts_with(&format!("{}/", prefix))
            }
            MatchType::Glob(glob) => glob.is_match(repository),
        }
    }
}

fn is_same_or_below(repository: &str, path: &str) -> bool {
    match repository.strip_prefix(path) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}
