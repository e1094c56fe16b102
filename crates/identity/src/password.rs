//! Password hashing.
//!
//! Raw passwords never leave the command: events and snapshots only carry the
//! hex-encoded SHA-256 digest.

use sha2::{Digest, Sha256};

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compare two strings without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for idx in 0..len {
        let x = a.get(idx).copied().unwrap_or(0);
        let y = b.get(idx).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_password("a-valid-password");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_password("a-valid-password"));
        assert_ne!(hash, hash_password("another-password"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abc\0"));
        assert!(!constant_time_eq("", "a"));
    }
}
