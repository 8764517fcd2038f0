use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Display;

/// Normalizes a keyword for comparison: lowercase, punctuation treated as
/// whitespace, whitespace collapsed.
///
/// `"Time-Loop"`, `"time loop"` and `" TIME  loop! "` all normalize to `"time loop"`.
/// Lowercasing runs before the punctuation strip and keeps every char of a
/// multi-char lowercase mapping, in the same order as the SQL title match.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized, de-duplicated and sorted keyword set. Empty entries are dropped.
pub fn normalized_keyword_set<S: AsRef<str>>(keywords: &[S]) -> BTreeSet<String> {
    keywords
        .iter()
        .map(|k| normalize_keyword(k.as_ref()))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Deterministic identifier of a recommendation request.
///
/// SHA-256 over the source movie ID and the sorted normalized keyword set, so
/// keyword order, case and punctuation do not change the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new<S: AsRef<str>>(source_movie_id: i64, keywords: &[S]) -> Self {
        let keywords = normalized_keyword_set(keywords)
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");

        let digest = Sha256::digest(format!("{}:{}", source_movie_id, keywords).as_bytes());
        Self(format!("{:x}", digest))
    }

    #[cfg(test)]
    pub(crate) fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
