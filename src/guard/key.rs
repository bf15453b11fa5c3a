//! Rate limit key derivation.

/// A key that uniquely identifies one client's counting window.
///
/// The key is the namespace prefix followed by the client identity, so the
/// same identity always lands on the same counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Create a new key from a prefix and client identity.
    pub fn new(prefix: &str, identity: &str) -> Self {
        Self(format!("{}{}", prefix, identity))
    }

    /// The key as stored in the counter store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
