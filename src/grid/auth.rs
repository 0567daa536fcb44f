//! Privileged-token generation and validation
//!
//! Every instance generates a local token at startup. When the instance is a
//! master, all intra-grid calls must present it; a mismatch yields a plain
//! `false` across the RPC boundary instead of an error. The token is never
//! exposed over the public surface.

use rand::RngCore;

/// Bytes of entropy per token (256 bits, hex-encoded to 64 chars)
const TOKEN_BYTES: usize = 32;

/// Guard holding this instance's privileged token
#[derive(Debug, Clone)]
pub struct TokenGuard {
    token: String,
}

impl TokenGuard {
    /// Create a guard with a freshly generated token
    pub fn new() -> Self {
        Self {
            token: Self::generate(),
        }
    }

    /// Create a guard around a known token (slave side, received from master)
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Generate a random hex token from OS entropy
    pub fn generate() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Check a candidate against the local token
    pub fn validate(&self, candidate: &str) -> bool {
        candidate == self.token
    }

    /// The local token value
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Default for TokenGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_length_and_charset() {
        let token = TokenGuard::generate();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(TokenGuard::generate(), TokenGuard::generate());
    }

    #[test]
    fn test_validate() {
        let guard = TokenGuard::new();
        assert!(guard.validate(guard.token()));
        assert!(!guard.validate("deadbeef"));
        assert!(!guard.validate(""));
    }

    #[test]
    fn test_with_token() {
        let guard = TokenGuard::with_token("abc123");
        assert!(guard.validate("abc123"));
        assert!(!guard.validate("abc124"));
    }
}
