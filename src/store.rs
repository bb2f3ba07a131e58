//! User-record storage seam; the durable store itself is external.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::reset::ResetToken;

/// One account row as the core sees it. Owned by the storage collaborator;
/// the plaintext password never appears here.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    /// Stored lowercased; lookups by email are case-insensitive.
    pub email: String,
    /// PHC-encoded, algorithm-tagged, salted hash.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// At most one live reset token per user.
    pub reset_token: Option<ResetToken>,
}

/// Fields supplied when registering an account.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Accessor contract implemented by the storage collaborator.
///
/// Backed by a remote store, any method may fail transiently; such failures
/// are distinct from "not found" and surface as errors for the caller to
/// retry. Mutations are committed by the implementation.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up by exact username or case-insensitive email.
    async fn find_by_login(&self, username_or_email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    /// Look up by case-insensitive email only; usernames never match.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Look up the owner of a live-or-dead reset token by its exact value.
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<UserRecord>>;

    async fn username_taken(&self, username: &str) -> Result<bool>;

    async fn email_taken(&self, email: &str) -> Result<bool>;

    /// Insert a new account; fails on username or email collision.
    async fn insert(&self, user: NewUser) -> Result<UserRecord>;

    /// Overwrite (or clear, with `None`) the user's reset token.
    async fn set_reset_token(&self, user_id: i64, token: Option<ResetToken>) -> Result<()>;

    async fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Set a new password hash and clear the reset token in one transaction,
    /// so racing reset attempts cannot double-apply.
    async fn apply_password_reset(&self, user_id: i64, password_hash: String) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<i64, UserRecord>,
    next_id: i64,
}

/// Reference in-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag; account deactivation is admin-side glue, so it
    /// lives on the concrete store rather than the [`UserStore`] contract.
    pub fn set_active(&self, user_id: i64, active: bool) {
        if let Some(user) = self.inner.lock().users.get_mut(&user_id) {
            user.is_active = active;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_login(&self, username_or_email: &str) -> Result<Option<UserRecord>> {
        let email = username_or_email.to_lowercase();
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username_or_email || user.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.to_lowercase();
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|user| {
                user.reset_token
                    .as_ref()
                    .is_some_and(|reset| reset.token == token)
            })
            .cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.users.values().any(|user| user.username == username))
    }

    async fn email_taken(&self, email: &str) -> Result<bool> {
        let email = email.to_lowercase();
        let inner = self.inner.lock();
        Ok(inner.users.values().any(|user| user.email == email))
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord> {
        let mut inner = self.inner.lock();
        let email = user.email.to_lowercase();
        if inner
            .users
            .values()
            .any(|existing| existing.username == user.username || existing.email == email)
        {
            return Err(anyhow!("username or email already exists"));
        }

        inner.next_id += 1;
        let record = UserRecord {
            id: inner.next_id,
            username: user.username,
            email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
            last_login: None,
            is_active: true,
            reset_token: None,
        };
        inner.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_reset_token(&self, user_id: i64, token: Option<ResetToken>) -> Result<()> {
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("no such user: {user_id}"))?;
        user.reset_token = token;
        Ok(())
    }

    async fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("no such user: {user_id}"))?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn apply_password_reset(&self, user_id: i64, password_hash: String) -> Result<()> {
        // Single lock covers both writes, the in-memory transaction boundary.
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("no such user: {user_id}"))?;
        user.password_hash = password_hash;
        user.reset_token = None;
        Ok(())
    }
}
