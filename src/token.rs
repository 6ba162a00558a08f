//! Basket and master token generation.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes per token; URL-safe base64 turns this into 44 characters.
const TOKEN_BYTES: usize = 33;

/// Generates a cryptographically strong token that uses only URL-safe base64 characters.
///
/// Fails only if the OS random source fails; the error is propagated to the caller.
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE.encode(bytes))
}

/// Compares two tokens in constant time.
pub fn secure_compare(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_length() {
        let token = generate_token().unwrap();
        assert_eq!(token.len(), 44);
        assert!(token.len() >= 30, "insecure token is generated: {token}");
    }

    #[test]
    fn test_generate_token_charset() {
        let token = generate_token().unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn test_generate_token_unique() {
        assert_ne!(generate_token().unwrap(), generate_token().unwrap());
    }

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("abc123", "abc123"));
        assert!(!secure_compare("abc123", "abc124"));
        assert!(!secure_compare("abc123", "abc1234"));
        assert!(!secure_compare("", "a"));
        assert!(secure_compare("", ""));
    }
}
