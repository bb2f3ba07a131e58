//! Server-side session store with idle-timeout expiry.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::events::{ClientInfo, SecurityLogger};

const DEFAULT_IDLE_TIMEOUT_SECONDS: i64 = 24 * 60 * 60;

/// Session behavior knobs, read per validation call.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    idle_timeout_seconds: i64,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
        }
    }

    #[must_use]
    pub fn with_idle_timeout_seconds(mut self, seconds: i64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::seconds(self.idle_timeout_seconds)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-held session fields; the client only ever sees the opaque handle.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: i64,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// The opaque handle this record is stored under.
    pub token: String,
    /// Persist across browser restarts ("remember me").
    pub permanent: bool,
}

/// In-memory session manager: NoSession -> Active -> Destroyed, with expiry
/// detected lazily during validation rather than by a background sweep.
///
/// In a multi-process deployment the map would live in a shared store; every
/// operation here is idempotent and safe to retry against such a store.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    logger: Arc<SecurityLogger>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig, logger: Arc<SecurityLogger>) -> Self {
        Self::with_clock(config, logger, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        config: SessionConfig,
        logger: Arc<SecurityLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            clock,
            logger,
        }
    }

    /// Create a session for `user_id` and return its opaque handle.
    ///
    /// A prior handle passed as `replacing` is dropped silently, so a fresh
    /// login never continues an attacker-supplied session. Emits a
    /// `user_login` security event.
    ///
    /// # Errors
    /// Fails only if the system RNG is unavailable.
    pub fn create(
        &self,
        user_id: i64,
        remember: bool,
        replacing: Option<&str>,
        client: &ClientInfo,
    ) -> Result<String> {
        let now = self.clock.now();
        let token = generate_session_token()?;
        let session = Session {
            user_id,
            login_time: now,
            last_activity: now,
            token: token.clone(),
            permanent: remember,
        };

        {
            let mut sessions = self.sessions.lock();
            if let Some(prior) = replacing {
                sessions.remove(prior);
            }
            sessions.insert(token.clone(), session);
        }

        self.logger.log(
            "user_login",
            &format!("User {user_id} logged in"),
            Some(user_id),
            client,
        );
        Ok(token)
    }

    /// Whether `handle` refers to a live session.
    ///
    /// A session idle longer than the configured timeout is destroyed here,
    /// as a side effect, and reported invalid; validation and expiry-sweep
    /// are the same operation.
    pub fn is_valid(&self, handle: &str, client: &ClientInfo) -> bool {
        let now = self.clock.now();
        let expired = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get(handle) else {
                return false;
            };
            if now - session.last_activity > self.config.idle_timeout() {
                sessions.remove(handle)
            } else {
                return true;
            }
        };

        if let Some(session) = expired {
            self.logger.log(
                "user_logout",
                &format!("User {} logged out", session.user_id),
                Some(session.user_id),
                client,
            );
        }
        false
    }

    /// Refresh `last_activity` so idle time, not wall-clock since login,
    /// drives expiry. No-op for an absent session.
    pub fn touch(&self, handle: &str) {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(handle) {
            session.last_activity = now;
        }
    }

    /// Destroy the session behind `handle`; idempotent. Emits a
    /// `user_logout` event only when a session was actually present.
    pub fn destroy(&self, handle: &str, client: &ClientInfo) {
        let removed = self.sessions.lock().remove(handle);
        if let Some(session) = removed {
            self.logger.log(
                "user_logout",
                &format!("User {} logged out", session.user_id),
                Some(session.user_id),
                client,
            );
        }
    }

    /// Current time as this manager sees it, for callers that must stay on
    /// the same clock.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Snapshot of the session behind `handle`, if present. Does not refresh
    /// activity or check expiry; pair with [`Self::is_valid`].
    #[must_use]
    pub fn get(&self, handle: &str) -> Option<Session> {
        self.sessions.lock().get(handle).cloned()
    }
}

/// Random URL-safe session token; the value is opaque and never derived from
/// guessable input.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::CollectingSink;

    fn manager(timeout_seconds: i64) -> (SessionManager, ManualClock, Arc<CollectingSink>) {
        let clock = ManualClock::default();
        let sink = Arc::new(CollectingSink::new());
        let logger = Arc::new(SecurityLogger::with_clock(
            sink.clone(),
            Arc::new(clock.clone()),
        ));
        let manager = SessionManager::with_clock(
            SessionConfig::new().with_idle_timeout_seconds(timeout_seconds),
            logger,
            Arc::new(clock.clone()),
        );
        (manager, clock, sink)
    }

    #[test]
    fn create_then_validate() -> Result<()> {
        let (manager, _clock, sink) = manager(60);
        let handle = manager.create(7, false, None, &ClientInfo::default())?;
        assert!(manager.is_valid(&handle, &ClientInfo::default()));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "user_login");
        Ok(())
    }

    #[test]
    fn tokens_are_unique_and_opaque() -> Result<()> {
        let (manager, _clock, _sink) = manager(60);
        let first = manager.create(7, false, None, &ClientInfo::default())?;
        let second = manager.create(7, false, None, &ClientInfo::default())?;
        assert_ne!(first, second);
        // 32 bytes of entropy, URL-safe encoding without padding.
        assert_eq!(first.len(), 43);
        Ok(())
    }

    #[test]
    fn idle_expiry_destroys_and_stays_destroyed() -> Result<()> {
        let (manager, clock, sink) = manager(60);
        let handle = manager.create(7, false, None, &ClientInfo::default())?;

        clock.advance(Duration::seconds(61));
        assert!(!manager.is_valid(&handle, &ClientInfo::default()));
        // Destroyed, not resurrectable.
        assert!(!manager.is_valid(&handle, &ClientInfo::default()));
        assert!(manager.get(&handle).is_none());

        let events = sink.events();
        assert_eq!(events.last().map(|e| e.event_type.as_str()), Some("user_logout"));
        Ok(())
    }

    #[test]
    fn touch_extends_past_original_deadline() -> Result<()> {
        let (manager, clock, _sink) = manager(60);
        let handle = manager.create(7, false, None, &ClientInfo::default())?;

        clock.advance(Duration::seconds(45));
        manager.touch(&handle);
        clock.advance(Duration::seconds(45));
        // 90 seconds past login, but only 45 past the last activity.
        assert!(manager.is_valid(&handle, &ClientInfo::default()));
        Ok(())
    }

    #[test]
    fn destroy_is_idempotent_and_logs_once() -> Result<()> {
        let (manager, _clock, sink) = manager(60);
        let handle = manager.create(7, false, None, &ClientInfo::default())?;

        manager.destroy(&handle, &ClientInfo::default());
        manager.destroy(&handle, &ClientInfo::default());
        manager.destroy("no-such-handle", &ClientInfo::default());

        let logouts = sink
            .events()
            .iter()
            .filter(|event| event.event_type == "user_logout")
            .count();
        assert_eq!(logouts, 1);
        Ok(())
    }

    #[test]
    fn create_replaces_prior_session_silently() -> Result<()> {
        let (manager, _clock, sink) = manager(60);
        let first = manager.create(7, false, None, &ClientInfo::default())?;
        let second = manager.create(7, true, Some(&first), &ClientInfo::default())?;

        assert!(!manager.is_valid(&first, &ClientInfo::default()));
        assert!(manager.is_valid(&second, &ClientInfo::default()));
        assert!(manager.get(&second).is_some_and(|s| s.permanent));
        // Replacement is not a logout; only the two logins are recorded.
        assert!(sink
            .events()
            .iter()
            .all(|event| event.event_type == "user_login"));
        Ok(())
    }

    #[test]
    fn validation_at_the_deadline_is_still_valid() -> Result<()> {
        let (manager, clock, _sink) = manager(60);
        let handle = manager.create(7, false, None, &ClientInfo::default())?;

        // Exactly at the timeout: not yet beyond it.
        clock.advance(Duration::seconds(60));
        assert!(manager.is_valid(&handle, &ClientInfo::default()));
        Ok(())
    }
}
