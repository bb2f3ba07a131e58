//! Password hashing, verification, and strength policy.

use anyhow::{anyhow, Result};
use pbkdf2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Pbkdf2,
};
use serde::Serialize;

/// Symbols that count toward the advisory strength score.
const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Substrings that cost a strength point when present (case-insensitive).
const COMMON_PATTERNS: [&str; 5] = ["123", "abc", "password", "admin", "user"];

/// Raw score required before a password is reported as strong.
const STRONG_THRESHOLD: i8 = 4;

/// Hash a password with PBKDF2-SHA256 and a fresh random salt.
///
/// Two calls with the same input produce different encodings; both verify.
///
/// # Errors
/// Returns an error only if the hasher itself fails, never for weak input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC-encoded hash.
///
/// Returns `false` for any mismatch, malformed hash, or empty input; the
/// comparison inside the hasher is constant time.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Advisory strength feedback, distinct from the hard registration policy.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StrengthReport {
    /// Reported score, floored at 0.
    pub score: u8,
    pub feedback: Vec<&'static str>,
    /// True iff the raw (pre-floor) score reached the strong threshold.
    pub is_strong: bool,
}

/// Score a password 0..=5 and collect improvement advice.
///
/// One point each for length, uppercase, lowercase, digit, and symbol; one
/// point lost for common substrings. The common-pattern penalty can push the
/// raw score below zero, which still gates `is_strong` even though the
/// reported score floors at 0.
#[must_use]
pub fn score_strength(password: &str) -> StrengthReport {
    let mut score: i8 = 0;
    let mut feedback = Vec::new();

    // Characters, not bytes; multibyte letters count once.
    if password.chars().count() >= 8 {
        score += 1;
    } else {
        feedback.push("Password should be at least 8 characters long");
    }

    if password.chars().any(char::is_uppercase) {
        score += 1;
    } else {
        feedback.push("Password should contain at least one uppercase letter");
    }

    if password.chars().any(char::is_lowercase) {
        score += 1;
    } else {
        feedback.push("Password should contain at least one lowercase letter");
    }

    if password.chars().any(char::is_numeric) {
        score += 1;
    } else {
        feedback.push("Password should contain at least one number");
    }

    if password.chars().any(|c| SYMBOLS.contains(c)) {
        score += 1;
    } else {
        feedback.push("Password should contain at least one special character");
    }

    let lowered = password.to_lowercase();
    if COMMON_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        score -= 1;
        feedback.push("Password should not contain common patterns");
    }

    StrengthReport {
        score: u8::try_from(score.max(0)).unwrap_or(0),
        feedback,
        is_strong: score >= STRONG_THRESHOLD,
    }
}

/// Hard registration-time policy.
///
/// Length, uppercase, lowercase, and digit are enforced; symbols and common
/// patterns stay advisory via [`score_strength`]. The character classes here
/// are deliberately ASCII while the advisory scorer accepts any Unicode
/// letter or digit. Returns one message per violated rule, empty when the
/// password passes.
#[must_use]
pub fn validate_password(password: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if password.chars().count() < 8 {
        errors.push("Password must be at least 8 characters long.");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain at least one lowercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number.");
    }
    errors
}
