use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque, totally-ordered reference to a precise point in a document's
/// content, independent of any page numbering. The document model that
/// produced a locator defines its ordering; when the model offers no
/// comparison, byte-wise string comparison is an acceptable approximation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lexicographic fallback ordering, used when the document model does
    /// not supply its own comparison function.
    pub fn lexical_cmp(&self, other: &Locator) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_cmp_orders_bytes() {
        let a = Locator::new("loc:0001:00000000");
        let b = Locator::new("loc:0001:00000180");
        assert_eq!(a.lexical_cmp(&b), Ordering::Less);
        assert_eq!(b.lexical_cmp(&a), Ordering::Greater);
        assert_eq!(a.lexical_cmp(&a), Ordering::Equal);
    }

    #[test]
    fn serializes_as_plain_string() {
        let loc = Locator::new("epubcfi(/6/4!/4/2)");
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, "\"epubcfi(/6/4!/4/2)\"");
        let back: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
    }
}
