//! Caller origin allow-list.

use regex::Regex;

/// Predicate deciding whether a browser origin may open upload sessions.
pub trait OriginPolicy: Send + Sync {
    /// Returns true if `origin` (the raw `Origin` header value) is allowed.
    fn is_allowed(&self, origin: &str) -> bool;
}

/// [`OriginPolicy`] backed by a regex that must match the whole origin.
#[derive(Debug, Clone)]
pub struct PatternOriginPolicy {
    pattern: Regex,
}

impl PatternOriginPolicy {
    /// Compile `pattern`, anchored at both ends.
    ///
    /// # Errors
    ///
    /// Returns the regex compile error for an invalid pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self { pattern })
    }
}

impl OriginPolicy for PatternOriginPolicy {
    fn is_allowed(&self, origin: &str) -> bool {
        self.pattern.is_match(origin)
    }
}
