//! Small helpers shared across the authentication recipes.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// E.164-ish phone check: leading `+`, 7 to 15 digits.
pub(crate) fn valid_phone_number(phone_number: &str) -> bool {
    Regex::new(r"^\+[0-9]{7,15}$").is_ok_and(|regex| regex.is_match(phone_number))
}

/// One-time code sent over email or SMS.
pub(crate) fn generate_otp() -> Result<String> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate one-time code")?;
    let code = u32::from_be_bytes(bytes) % 1_000_000;
    Ok(format!("{code:06}"))
}

/// Opaque single-use token carried in a password-reset link.
pub(crate) fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization_trims_and_lowercases() {
        assert_eq!(normalize_email("  A@Example.COM "), "a@example.com");
    }

    #[test]
    fn email_validation() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn phone_validation() {
        assert!(valid_phone_number("+3615551234"));
        assert!(!valid_phone_number("3615551234"));
        assert!(!valid_phone_number("+12"));
    }

    #[test]
    fn reset_tokens_are_unique_and_url_safe() -> Result<()> {
        let first = generate_reset_token()?;
        let second = generate_reset_token()?;
        assert_ne!(first, second);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        Ok(())
    }

    #[test]
    fn otp_is_six_digits() -> Result<()> {
        let code = generate_otp()?;
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        Ok(())
    }
}
