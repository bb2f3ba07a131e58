//! Registration flow: validation, uniqueness, hashing, insertion.

use anyhow::Context;

use crate::password::hash_password;
use crate::store::{NewUser, UserRecord, UserStore};
use crate::validate::{normalize_email, validate_registration, FieldError, Registration};

/// Registration failure modes.
#[derive(Debug, thiserror::Error)]
pub enum SignupError {
    /// Field-scoped messages, surfaced to the form as-is.
    #[error("registration validation failed")]
    Validation(Vec<FieldError>),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Register a new account.
///
/// Runs the local field checks first, then the store-backed uniqueness
/// checks, and reports all failures together so the form can show every
/// problem at once. The password is hashed only after validation passes.
///
/// # Errors
/// `Validation` with one entry per violated rule, or `Storage` when the
/// store fails transiently (the caller may retry).
pub async fn register(
    store: &dyn UserStore,
    registration: &Registration,
) -> Result<UserRecord, SignupError> {
    let mut errors = validate_registration(registration);

    let email = normalize_email(&registration.email);
    if store
        .username_taken(&registration.username)
        .await
        .context("failed to check username uniqueness")?
    {
        errors.push(FieldError::new(
            "username",
            "Username already exists. Please choose a different one.",
        ));
    }
    if store
        .email_taken(&email)
        .await
        .context("failed to check email uniqueness")?
    {
        errors.push(FieldError::new(
            "email",
            "Email address already registered. Please use a different email.",
        ));
    }
    if !errors.is_empty() {
        return Err(SignupError::Validation(errors));
    }

    let password_hash = hash_password(&registration.password)?;
    let user = store
        .insert(NewUser {
            username: registration.username.clone(),
            email,
            password_hash,
        })
        .await
        .context("failed to insert user")?;
    Ok(user)
}
