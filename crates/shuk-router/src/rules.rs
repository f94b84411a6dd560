//! Classification rules
//!
//! Pure predicates over an [`UploadEvent`]. The object key's trailing bytes
//! are the only classification signal; the bucket scopes a rule.

use shuk_events::UploadEvent;

/// A predicate over upload events.
pub trait Rule: Send + Sync {
    fn matches(&self, event: &UploadEvent) -> bool;
}

/// Matches keys ending (or, negated, not ending) with a suffix.
///
/// Comparison is case-sensitive and byte-exact. An empty suffix matches
/// every key; a negated empty suffix matches none.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SuffixRule {
    suffix: String,
    negate: bool,
}

impl SuffixRule {
    pub fn new(suffix: impl Into<String>, negate: bool) -> Self {
        Self {
            suffix: suffix.into(),
            negate,
        }
    }

    /// Keys ending with `suffix`.
    pub fn ends_with(suffix: impl Into<String>) -> Self {
        Self::new(suffix, false)
    }

    /// Keys not ending with `suffix`.
    pub fn not_ends_with(suffix: impl Into<String>) -> Self {
        Self::new(suffix, true)
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn matches_key(&self, key: &str) -> bool {
        key.ends_with(self.suffix.as_str()) != self.negate
    }

    /// True for the degenerate rule that no key satisfies.
    pub fn matches_nothing(&self) -> bool {
        self.negate && self.suffix.is_empty()
    }

    /// Whether some key satisfies both rules.
    pub fn overlaps(&self, other: &SuffixRule) -> bool {
        if self.matches_nothing() || other.matches_nothing() {
            return false;
        }

        match (self.negate, other.negate) {
            (false, false) => {
                self.suffix.ends_with(other.suffix.as_str())
                    || other.suffix.ends_with(self.suffix.as_str())
            }
            // Every key ending in `pos` also ends in `neg` iff `pos` ends in `neg`
            (false, true) => !self.suffix.ends_with(other.suffix.as_str()),
            (true, false) => !other.suffix.ends_with(self.suffix.as_str()),
            // Two non-empty exclusions always leave keys matching both
            (true, true) => true,
        }
    }
}

impl Rule for SuffixRule {
    fn matches(&self, event: &UploadEvent) -> bool {
        self.matches_key(event.object_key())
    }
}

/// Matches events from one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeRule {
    bucket: String,
}

impl ScopeRule {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl Rule for ScopeRule {
    fn matches(&self, event: &UploadEvent) -> bool {
        event.bucket_name() == self.bucket
    }
}

/// Scope AND suffix, restricted to object-creation events from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeRule {
    scope: ScopeRule,
    suffix: SuffixRule,
}

impl CompositeRule {
    pub fn new(scope: ScopeRule, suffix: SuffixRule) -> Self {
        Self { scope, suffix }
    }

    pub fn scope(&self) -> &ScopeRule {
        &self.scope
    }

    pub fn suffix(&self) -> &SuffixRule {
        &self.suffix
    }
}

impl Rule for CompositeRule {
    fn matches(&self, event: &UploadEvent) -> bool {
        event.is_object_created() && self.scope.matches(event) && self.suffix.matches(event)
    }
}
