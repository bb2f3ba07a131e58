//! # Madaris Auth (Authentication & Abuse-Prevention Core)
//!
//! `madaris-auth` is the authentication, session, and abuse-prevention core
//! of the Madaris course platform. The web layer (routing, rendering,
//! course CRUD) stays outside; it reaches this crate through a handful of
//! seams and gates.
//!
//! ## Credentials
//!
//! Passwords are hashed with PBKDF2-SHA256 and a fresh random salt per call
//! and verified in constant time. Two separate gates apply: a hard
//! registration policy (length, upper, lower, digit) and an advisory
//! strength score that additionally surfaces symbol and common-pattern
//! advice.
//!
//! ## Sessions & reset tokens
//!
//! Sessions are server-held records behind opaque random handles, expired
//! lazily on validation by idle time. Password-reset tokens carry 32 bytes
//! of entropy, live for one hour, and are verified without being consumed;
//! the reset flow clears them inside one storage transaction.
//!
//! ## Abuse prevention
//!
//! A sliding-window rate limiter with temporary blocking buckets requests
//! by client IP (`X-Forwarded-For`, then `X-Real-IP`, then the peer
//! address). Security-relevant events are emitted as structured `tracing`
//! records through a pluggable sink that never disturbs request handling.

pub mod clock;
pub mod events;
pub mod http;
pub mod login;
pub mod password;
pub mod rate_limit;
pub mod reset;
pub mod session;
pub mod signup;
pub mod store;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{ClientInfo, CollectingSink, EventSink, SecurityEvent, SecurityLogger, TracingSink};
pub use http::{
    clear_session_cookie, extract_session_handle, require_login, require_rate_limit,
    session_cookie, CurrentUser, Rejection, SECURITY_HEADERS, SESSION_COOKIE_NAME,
};
pub use login::{login, logout, LoginError};
pub use password::{
    hash_password, score_strength, validate_password, verify_password, StrengthReport,
};
pub use rate_limit::{
    NoopRateLimiter, RateLimitDecision, RateLimitPolicy, RateLimiter, SlidingWindowLimiter,
};
pub use reset::{forgot_password, reset_password, ResetError, ResetToken, ResetTokenManager};
pub use session::{Session, SessionConfig, SessionManager};
pub use signup::{register, SignupError};
pub use store::{MemoryUserStore, NewUser, UserRecord, UserStore};
pub use validate::{FieldError, Registration};
