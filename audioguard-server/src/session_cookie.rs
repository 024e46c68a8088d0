//! Session cookie and client address helpers for the HTTP layer.

use std::net::{IpAddr, SocketAddr};

use audioguard_core::config::SessionConfig;
use audioguard_core::session::{self, Session, SessionError, SessionStore};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

/// Value of the named cookie, if the request carries it.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

/// `Set-Cookie` value for a freshly issued session.
pub fn session_cookie(config: &SessionConfig, session: &Session, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        config.cookie_name, session.id, config.ttl_secs, secure_flag
    )
}

/// Resolve the caller's session, returning the `Set-Cookie` header to attach
/// when a new session had to be issued.
pub async fn resolve_session(
    store: &dyn SessionStore,
    config: &SessionConfig,
    headers: &HeaderMap,
    secure: bool,
) -> Result<(Session, Option<(axum::http::HeaderName, HeaderValue)>), SessionError> {
    let ttl = config.ttl();
    let presented = cookie_value(headers, &config.cookie_name);
    let (session, issued) = session::resolve_or_issue(store, presented, ttl).await?;

    if !issued {
        return Ok((session, None));
    }

    tracing::debug!(session_id = %session.id, "Issued new session");
    let cookie = HeaderValue::from_str(&session_cookie(config, &session, secure))
        .map_err(|e| SessionError::Backend(format!("invalid cookie value: {}", e)))?;
    Ok((session, Some((SET_COOKIE, cookie))))
}

/// Best-effort client address for audit: `X-Forwarded-For`, then
/// `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let from_header = |name: &str, first_only: bool| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| if first_only { v.split(',').next() } else { Some(v) })
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    from_header("x-forwarded-for", true)
        .or_else(|| from_header("x-real-ip", false))
        .or_else(|| peer.map(|p| p.ip()))
        .map(|ip| ip.to_string())
}
