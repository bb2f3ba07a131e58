//! Time-boxed password-reset tokens and the forgot/reset flows.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::password::hash_password;
use crate::store::{UserRecord, UserStore};
use crate::validate::{normalize_email, FieldError};

/// Reset tokens live for one hour.
const RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;

/// A live (or expired) reset token attached to a user record.
#[derive(Clone, Debug)]
pub struct ResetToken {
    /// URL-safe encoding of 32 random bytes; opaque, no internal structure.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    /// Constant-time match against a presented token, disregarding expiry.
    fn matches(&self, presented: &str) -> bool {
        self.token.len() == presented.len()
            && bool::from(self.token.as_bytes().ct_eq(presented.as_bytes()))
    }
}

/// Issues, verifies, and clears reset tokens against the user store.
pub struct ResetTokenManager {
    clock: Arc<dyn Clock>,
}

impl ResetTokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Issue a fresh token for `user_id`, overwriting any previous token,
    /// and return the raw value for the email collaborator to deliver.
    ///
    /// # Errors
    /// Fails on RNG or storage failure; nothing is partially written.
    pub async fn issue(&self, store: &dyn UserStore, user_id: i64) -> Result<String> {
        let token = generate_reset_token()?;
        let record = ResetToken {
            token: token.clone(),
            expires_at: self.clock.now() + Duration::seconds(RESET_TOKEN_TTL_SECONDS),
        };
        store
            .set_reset_token(user_id, Some(record))
            .await
            .context("failed to persist reset token")?;
        Ok(token)
    }

    /// Pure predicate: the user's token is set, matches exactly, and has not
    /// expired. Never mutates state, so repeated verification within the
    /// validity window is idempotent until [`Self::clear`] is called.
    #[must_use]
    pub fn verify(&self, user: &UserRecord, presented: &str) -> bool {
        user.reset_token
            .as_ref()
            .is_some_and(|reset| reset.matches(presented) && self.clock.now() < reset.expires_at)
    }

    /// Unset token and expiry; idempotent, callers invoke it after a
    /// successful password reset.
    ///
    /// # Errors
    /// Fails only on storage failure.
    pub async fn clear(&self, store: &dyn UserStore, user_id: i64) -> Result<()> {
        store
            .set_reset_token(user_id, None)
            .await
            .context("failed to clear reset token")
    }
}

impl Default for ResetTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Reset-password failure modes. `InvalidToken` carries no detail about
/// whether the token was unknown, expired, or mismatched.
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("Invalid or expired reset token.")]
    InvalidToken,
    #[error("password validation failed")]
    Validation(Vec<FieldError>),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Handle a forgot-password request for `email`.
///
/// Returns the raw token for the email collaborator when the account exists,
/// `None` otherwise; the caller shows the same user-facing message either
/// way so the response never reveals whether an email is registered.
///
/// # Errors
/// Fails only on storage failure.
pub async fn forgot_password(
    store: &dyn UserStore,
    manager: &ResetTokenManager,
    email: &str,
) -> Result<Option<String>> {
    let email = normalize_email(email);
    let Some(user) = store.find_by_email(&email).await? else {
        return Ok(None);
    };
    let token = manager.issue(store, user.id).await?;
    info!("Issued password reset token for {email}");
    Ok(Some(token))
}

/// Complete a password reset: verify the token, enforce the hard password
/// policy and confirmation, then set the new hash and clear the token in a
/// single storage transaction.
///
/// # Errors
/// `InvalidToken` for unknown/expired/mismatched tokens, `Validation` for
/// policy failures, `Storage` for transient store errors.
pub async fn reset_password(
    store: &dyn UserStore,
    manager: &ResetTokenManager,
    token: &str,
    new_password: &str,
    password_confirm: &str,
) -> Result<(), ResetError> {
    let user = store
        .find_by_reset_token(token)
        .await?
        .ok_or(ResetError::InvalidToken)?;
    if !manager.verify(&user, token) {
        return Err(ResetError::InvalidToken);
    }

    let mut errors: Vec<FieldError> = crate::password::validate_password(new_password)
        .into_iter()
        .map(|message| FieldError::new("password", message))
        .collect();
    if new_password != password_confirm {
        errors.push(FieldError::new("password_confirm", "Passwords must match."));
    }
    if !errors.is_empty() {
        return Err(ResetError::Validation(errors));
    }

    let password_hash = hash_password(new_password)?;
    store
        .apply_password_reset(user.id, password_hash)
        .await
        .context("failed to apply password reset")?;
    Ok(())
}

/// Random URL-safe reset token with 32 bytes of entropy.
fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
