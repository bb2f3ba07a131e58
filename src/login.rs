//! Login and logout flows over the credential, session, and event components.

use tracing::error;

use crate::events::{ClientInfo, SecurityLogger};
use crate::password::verify_password;
use crate::session::SessionManager;
use crate::store::UserStore;

/// The one user-facing message for every credential failure; it never
/// reveals whether the username or the password was wrong.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password.";

/// Login failure modes. Operators get the specific cause through the
/// security log; end users only ever see [`LoginError::user_message`].
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// Unknown account or wrong password, indistinguishably.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is deactivated")]
    AccountDisabled,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LoginError {
    /// Message safe to put in a response body.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE,
            Self::AccountDisabled => {
                "Your account has been deactivated. Please contact support."
            }
            Self::Storage(_) => "Something went wrong. Please try again later.",
        }
    }
}

/// Authenticate and open a session, returning the opaque session handle.
///
/// Looks the account up by exact username or case-insensitive email,
/// verifies the password, rejects deactivated accounts, then creates the
/// session (dropping `prior_handle`, so a login never continues an existing
/// session) and records the last-login timestamp. A failed attempt emits a
/// `failed_login_attempt` security event; the session manager emits the
/// `user_login` event on success.
///
/// Rate limiting is the caller's gate and runs before this function; see
/// `http::require_rate_limit`.
///
/// # Errors
/// `InvalidCredentials`, `AccountDisabled`, or `Storage` for transient
/// store failures.
pub async fn login(
    store: &dyn UserStore,
    sessions: &SessionManager,
    logger: &SecurityLogger,
    username_or_email: &str,
    password: &str,
    remember: bool,
    prior_handle: Option<&str>,
    client: &ClientInfo,
) -> Result<String, LoginError> {
    let user = store.find_by_login(username_or_email).await?;

    let Some(user) = user.filter(|user| verify_password(password, &user.password_hash)) else {
        logger.log(
            "failed_login_attempt",
            &format!("Failed login for username: {username_or_email}"),
            None,
            client,
        );
        return Err(LoginError::InvalidCredentials);
    };

    if !user.is_active {
        return Err(LoginError::AccountDisabled);
    }

    let handle = sessions.create(user.id, remember, prior_handle, client)?;

    // Login has already succeeded; a failed timestamp update is an operator
    // problem, not a login failure.
    if let Err(err) = store.touch_last_login(user.id, sessions.now()).await {
        error!("Failed to update last login for user {}: {err}", user.id);
    }

    Ok(handle)
}

/// Close the session behind `handle`. Idempotent; the session manager emits
/// the `user_logout` event when a session was present.
pub fn logout(sessions: &SessionManager, handle: &str, client: &ClientInfo) {
    sessions.destroy(handle, client);
}
