//! Rate limit key generation and handling.

/// Source address used when the transport cannot report one.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// A key that uniquely identifies one counter: an identity seen from one
/// source address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The matched identity name
    pub identity: String,
    /// The caller-reported source address
    pub address: String,
}

impl RateLimitKey {
    /// Create a new rate limit key.
    ///
    /// An empty address collapses onto the shared `unknown` sentinel.
    pub fn new(identity: &str, address: &str) -> Self {
        let address = address.trim();
        Self {
            identity: identity.to_string(),
            address: if address.is_empty() {
                UNKNOWN_ADDRESS.to_string()
            } else {
                address.to_string()
            },
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bot:{}:{}", self.identity, self.address)
    }
}
