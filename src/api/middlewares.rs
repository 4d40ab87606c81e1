//! Middleware module.
//!
//! Provides authentication and client address extraction.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::config::APP_CONFIG;
use crate::error::AppError;
use crate::utils::throttle::client_ip;
use crate::utils::{parse_token, Claims};

/// Extension type for storing authenticated visitor claims.
/// Handlers read the share owner from it via axum's Extension extractor.
#[derive(Clone)]
pub struct AuthUser(pub Claims);

/// Client address used as the lookup throttle bucket.
///
/// Forwarding headers only count when the peer is listed in
/// `TRUSTED_PROXIES`. Works without `ConnectInfo` too, so routers built in
/// tests can still serve throttled routes.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(client_ip(
            &parts.headers,
            peer,
            &APP_CONFIG.trusted_proxies,
        )))
    }
}

/// Name of the cookie that carries the visitor token.
pub const TOKEN_COOKIE: &str = "token";

/// Requires a valid visitor token on share mutations.
///
/// The token comes from `Authorization: Bearer <token>` or, for the browser
/// page, from the `token` cookie issued by the index handler. Its subject
/// becomes the share owner. Missing or invalid tokens yield 401.
pub async fn jwt_auth(
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers(), &jar)
        .ok_or_else(|| AppError::Unauthorized("No token provided".to_string()))?;

    let claims = parse_token(&token).map_err(|e| AppError::Unauthorized(e.to_string()))?;
    tracing::trace!(owner = %claims.sub, "Visitor authenticated");

    request.extensions_mut().insert(AuthUser(claims));
    Ok(next.run(request).await)
}

/// Bearer header first, then the cookie. The scheme is case-sensitive.
fn extract_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| jar.get(TOKEN_COOKIE).map(|c| c.value().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum_extra::extract::cookie::Cookie;

    // ============ extract_token 함수 테스트 ============

    fn auth_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_token_from_bearer_header() {
        let token = extract_token(&auth_headers("Bearer visitor_token"), &CookieJar::new());
        assert_eq!(token.as_deref(), Some("visitor_token"));
    }

    #[test]
    fn test_extract_token_rejects_other_schemes() {
        let jar = CookieJar::new();
        assert!(extract_token(&auth_headers("Basic abc123"), &jar).is_none());
        // 스킴은 대소문자를 구분함
        assert!(extract_token(&auth_headers("bearer lowercase"), &jar).is_none());
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let jar = CookieJar::new().add(Cookie::new(TOKEN_COOKIE, "cookie_token"));
        let token = extract_token(&HeaderMap::new(), &jar);
        assert_eq!(token.as_deref(), Some("cookie_token"));
    }

    #[test]
    fn test_extract_token_header_takes_precedence() {
        let jar = CookieJar::new().add(Cookie::new(TOKEN_COOKIE, "cookie_token"));
        let token = extract_token(&auth_headers("Bearer header_token"), &jar);
        assert_eq!(token.as_deref(), Some("header_token"));
    }

    #[test]
    fn test_extract_token_none() {
        assert!(extract_token(&HeaderMap::new(), &CookieJar::new()).is_none());
    }

    // ============ ClientIp 추출 테스트 ============

    #[tokio::test]
    async fn test_client_ip_from_connect_info() {
        let mut request = Request::builder().uri("/").body(()).unwrap();
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let (mut parts, ()) = request.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, "192.0.2.10");
    }

    #[tokio::test]
    async fn test_client_ip_ignores_spoofed_forwarded_header() {
        let mut request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap();
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let (mut parts, ()) = request.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, "192.0.2.10");
    }

    #[tokio::test]
    async fn test_client_ip_without_connect_info() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let (mut parts, ()) = request.into_parts();
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, "unknown");
    }
}
