use std::fmt::{Display, Formatter};

use hex::encode;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Matches any current state, including "file doesn't exist yet"
pub const WILDCARD: &str = "*";

/// Content fingerprint handed out to callers as an optimistic-concurrency token.
///
/// Derived from the bytes alone, so the same content always yields the same
/// tag no matter when, where or in which version it was written.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a caller-supplied `If-Match` value refers to this tag.
    /// Surrounding quotes (as sent in HTTP headers) are ignored.
    pub fn matches(&self, if_match: &str) -> bool {
        if_match.trim().trim_matches('"') == self.0
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Evaluate an optional `If-Match` token against the current state of a file.
///
/// No token or the wildcard means no comparison at all. A concrete token
/// against a missing file never matches.
pub fn precondition_holds(current: Option<&ETag>, if_match: Option<&str>) -> bool {
    match if_match.map(str::trim) {
        None | Some(WILDCARD) => true,
        Some(tag) => current.map_or(false, |etag| etag.matches(tag)),
    }
}
