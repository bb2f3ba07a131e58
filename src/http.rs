//! Request-edge helpers: client attribution, security headers, and the
//! gates the web layer composes in front of route logic.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::events::ClientInfo;
use crate::rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use crate::session::SessionManager;
use crate::store::{UserRecord, UserStore};

/// Fixed security headers the web layer attaches to every response. No
/// legacy `X-XSS-Protection`; the content-security-policy covers it.
pub const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("X-Frame-Options", "DENY"),
    ("X-Content-Type-Options", "nosniff"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    (
        "Content-Security-Policy",
        "default-src 'self'; script-src 'self'; style-src 'self'; \
         font-src 'self'; img-src 'self' data:; connect-src 'self';",
    ),
];

/// Insert the fixed policy table into a response header map.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Resolve the client identifier used for rate-limit bucketing.
///
/// Precedence is fixed: first entry of `X-Forwarded-For`, else `X-Real-IP`,
/// else the direct peer address. Proxied deployments depend on this exact
/// order.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<&str>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if real_ip.is_some() {
        return real_ip.map(str::to_string);
    }
    peer.map(str::to_string)
}

/// Resolve the request's client attribution once, up front.
#[must_use]
pub fn client_info(headers: &HeaderMap, peer: Option<&str>) -> ClientInfo {
    ClientInfo {
        ip: client_ip(headers, peer),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

/// Cookie under which the web layer transports the opaque session handle.
pub const SESSION_COOKIE_NAME: &str = "madaris_session";

/// Build the session cookie: HTTP-only and same-site-restricted always,
/// `Secure` when the deployment serves HTTPS.
///
/// # Errors
/// Fails only if the token contains bytes invalid in a header value.
pub fn session_cookie(
    token: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Cookie that clears the session handle on logout.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Extract the session handle from a request's `Cookie` header.
#[must_use]
pub fn extract_session_handle(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next().map(str::trim);
        if key == Some(SESSION_COOKIE_NAME) {
            if let Some(val) = parts.next() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

/// Gate rejection, distinguishable by the web layer and convertible
/// straight into a response.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Rate limit exceeded. Please try again later.")]
    TooManyRequests { retry_after: i64 },
    #[error("Please log in to access this page.")]
    LoginRequired,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Self::TooManyRequests { retry_after } => {
                let body = Json(json!({
                    "error": "Rate limit exceeded. Please try again later.",
                    "retry_after": retry_after,
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                response
            }
            Self::LoginRequired => {
                let body = Json(json!({
                    "error": "Please log in to access this page.",
                }));
                (StatusCode::UNAUTHORIZED, body).into_response()
            }
        }
    }
}

/// Rate-limit gate for sensitive endpoints; runs before the handler.
///
/// Buckets by [`client_ip`]; requests with no resolvable identifier share
/// one bucket rather than bypassing the limiter.
///
/// # Errors
/// `TooManyRequests` carrying the configured block duration.
pub fn require_rate_limit(
    limiter: &dyn RateLimiter,
    headers: &HeaderMap,
    peer: Option<&str>,
    policy: &RateLimitPolicy,
) -> Result<(), Rejection> {
    let id = client_ip(headers, peer).unwrap_or_else(|| "unknown".to_string());
    match limiter.check(&id, policy) {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited { retry_after } => {
            Err(Rejection::TooManyRequests { retry_after })
        }
    }
}

/// The identity behind one request: the session handle resolved to a user
/// id exactly once, then carried by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: i64,
}

impl CurrentUser {
    /// Fetch the full record when a handler needs more than the id.
    ///
    /// # Errors
    /// Propagates transient store failures.
    pub async fn load(&self, store: &dyn UserStore) -> anyhow::Result<Option<UserRecord>> {
        store.find_by_id(self.user_id).await
    }
}

/// Login gate: validates the session, refreshes its activity clock, and
/// resolves the current user.
///
/// # Errors
/// `LoginRequired` when the handle is absent, expired, or unknown.
pub fn require_login(
    sessions: &SessionManager,
    handle: Option<&str>,
    client: &ClientInfo,
) -> Result<CurrentUser, Rejection> {
    let handle = handle.ok_or(Rejection::LoginRequired)?;
    if !sessions.is_valid(handle, client) {
        return Err(Rejection::LoginRequired);
    }
    // Honoring the request, so idle time restarts now.
    sessions.touch(handle);
    let session = sessions.get(handle).ok_or(Rejection::LoginRequired)?;
    Ok(CurrentUser {
        user_id: session.user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SecurityLogger;
    use crate::rate_limit::SlidingWindowLimiter;
    use crate::session::SessionConfig;
    use anyhow::Result;
    use axum::body::to_bytes;
    use std::sync::Arc;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(
            client_ip(&headers, Some("127.0.0.1")),
            Some("1.2.3.4".to_string())
        );
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(
            client_ip(&headers, Some("127.0.0.1")),
            Some("9.9.9.9".to_string())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            client_ip(&headers, Some("127.0.0.1")),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(client_ip(&headers, None), None);
    }

    #[test]
    fn client_info_captures_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static("test-agent/1.0"),
        );
        let info = client_info(&headers, Some("10.0.0.1"));
        assert_eq!(info.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.user_agent.as_deref(), Some("test-agent/1.0"));
    }

    #[test]
    fn security_headers_apply_cleanly() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);
        assert_eq!(headers.len(), SECURITY_HEADERS.len());
        assert_eq!(
            headers.get("x-frame-options").and_then(|v| v.to_str().ok()),
            Some("DENY")
        );
        assert_eq!(
            headers
                .get("x-content-type-options")
                .and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );
    }

    #[test]
    fn rate_limit_gate_rejects_after_policy_limit() {
        let limiter = SlidingWindowLimiter::new();
        let policy = RateLimitPolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));

        for _ in 0..5 {
            assert!(require_rate_limit(&limiter, &headers, None, &policy).is_ok());
        }
        assert_eq!(
            require_rate_limit(&limiter, &headers, None, &policy),
            Err(Rejection::TooManyRequests { retry_after: 900 })
        );
    }

    #[tokio::test]
    async fn too_many_requests_response_carries_retry_after() -> anyhow::Result<()> {
        let response = Rejection::TooManyRequests { retry_after: 900 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("900")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(
            value.get("retry_after").and_then(serde_json::Value::as_i64),
            Some(900)
        );
        Ok(())
    }

    #[test]
    fn login_gate_requires_a_live_session() {
        let logger = Arc::new(SecurityLogger::default());
        let sessions = SessionManager::new(SessionConfig::new(), logger);
        let client = ClientInfo::default();

        assert_eq!(
            require_login(&sessions, None, &client),
            Err(Rejection::LoginRequired)
        );
        assert_eq!(
            require_login(&sessions, Some("stale-handle"), &client),
            Err(Rejection::LoginRequired)
        );

        let handle = sessions
            .create(7, false, None, &client)
            .expect("session create");
        assert_eq!(
            require_login(&sessions, Some(&handle), &client),
            Ok(CurrentUser { user_id: 7 })
        );
    }

    #[test]
    fn session_cookie_carries_transport_attributes() -> Result<()> {
        let insecure = session_cookie("tok123", 86_400, false)?;
        let value = insecure.to_str()?;
        assert!(value.starts_with("madaris_session=tok123;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Max-Age=86400"));
        assert!(!value.contains("Secure"));

        let secure = session_cookie("tok123", 86_400, true)?;
        assert!(secure.to_str()?.ends_with("; Secure"));

        let cleared = clear_session_cookie(false);
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn extracts_session_handle_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; madaris_session=abc123; lang=ar"),
        );
        assert_eq!(extract_session_handle(&headers), Some("abc123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark"),
        );
        assert_eq!(extract_session_handle(&headers), None);
    }
}
