//! Contact number normalization and secret hashing.

use sha2::{Digest, Sha256};

/// Fewest digits accepted in a contact number.
pub const MIN_PHONE_DIGITS: usize = 10;

/// Most digits accepted in a contact number (E.164 ceiling).
pub const MAX_PHONE_DIGITS: usize = 15;

/// Hash a secret using SHA-256, hex encoded.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalize a contact number into the key used for code bookkeeping.
///
/// Separators (spaces, dashes, dots, parentheses) are dropped and a single
/// leading `+` is kept. Anything else that is not an ASCII digit is rejected.
pub fn normalize_phone_number(number: &str) -> Result<String, String> {
    let trimmed = number.trim();
    let (has_plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            other => return Err(format!("Unexpected character '{}' in phone number", other)),
        }
    }

    if digits.is_empty() {
        return Err("Phone number must contain at least one digit".into());
    }

    if digits.len() < MIN_PHONE_DIGITS {
        return Err("Phone number too short".into());
    }

    if digits.len() > MAX_PHONE_DIGITS {
        return Err("Phone number too long".into());
    }

    if has_plus {
        Ok(format!("+{}", digits))
    } else {
        Ok(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_secret() {
        let hash1 = hash_secret("482913");
        let hash2 = hash_secret("482913");
        let hash3 = hash_secret("482914");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_normalize_local_number() {
        assert_eq!(normalize_phone_number("0821234567"), Ok("0821234567".into()));
        assert_eq!(normalize_phone_number("082 123 4567"), Ok("0821234567".into()));
        assert_eq!(normalize_phone_number("(082) 123-4567"), Ok("0821234567".into()));
    }

    #[test]
    fn test_normalize_international_number() {
        assert_eq!(
            normalize_phone_number("+27 82 123 4567"),
            Ok("+27821234567".into())
        );
        assert_eq!(
            normalize_phone_number("  +14155551234 "),
            Ok("+14155551234".into())
        );
    }

    #[test]
    fn test_normalize_rejects_bad_numbers() {
        assert!(normalize_phone_number("").is_err());
        assert!(normalize_phone_number("12345").is_err());
        assert!(normalize_phone_number("0821234567890123").is_err());
        assert!(normalize_phone_number("082abc4567").is_err());
        assert!(normalize_phone_number("++0821234567").is_err());
    }
}
