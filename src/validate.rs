//! Field-level validation for registration input.

use regex::Regex;
use serde::Serialize;

use crate::password::validate_password;

/// One validation failure, scoped to the form field it concerns.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

/// Registration form input as received from the web layer.
#[derive(Clone, Debug)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

fn valid_username_format(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]+$").is_ok_and(|regex| regex.is_match(username))
}

/// Run the local (store-independent) registration checks.
///
/// Uniqueness of username and email needs the store and is checked by the
/// signup flow, which appends its own field errors to these.
#[must_use]
pub fn validate_registration(registration: &Registration) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let username = registration.username.as_str();
    if username.len() < 4 || username.len() > 20 {
        errors.push(FieldError::new(
            "username",
            "Username must be between 4 and 20 characters.",
        ));
    }
    if !username.is_empty() && !valid_username_format(username) {
        errors.push(FieldError::new(
            "username",
            "Username can only contain letters, numbers, and underscores.",
        ));
    }

    if !valid_email(&normalize_email(&registration.email)) {
        errors.push(FieldError::new(
            "email",
            "Please enter a valid email address.",
        ));
    }

    for message in validate_password(&registration.password) {
        errors.push(FieldError::new("password", message));
    }

    if registration.password != registration.password_confirm {
        errors.push(FieldError::new("password_confirm", "Passwords must match."));
    }

    errors
}
