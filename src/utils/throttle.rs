//! Brute-force throttle for share code lookups.
//!
//! Six digits is a small space, so every lookup reserves a slot in a per-IP
//! Redis counter before it runs. Lookups that find a live share hand the slot
//! back; unknown and expired codes keep it. Once the counter passes
//! `LOOKUP_FAILURE_LIMIT` inside the window, lookups from that IP answer 429
//! until the key expires. Reserving up front keeps the limit exact under
//! concurrent requests. Redis trouble never blocks a lookup.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use deadpool_redis::redis::cmd;
use deadpool_redis::Connection;

use crate::config::APP_CONFIG;
use crate::error::{AppError, AppResult};

/// INCR that opens the window on the first hit, in one round trip.
const RESERVE_SCRIPT: &str = r"
local n = redis.call('INCR', KEYS[1])
if n == 1 then redis.call('EXPIRE', KEYS[1], ARGV[1]) end
return n
";

/// DECR that never creates the key or goes below zero.
const RELEASE_SCRIPT: &str = r"
local n = tonumber(redis.call('GET', KEYS[1]) or '0')
if n > 0 then return redis.call('DECR', KEYS[1]) end
return 0
";

/// Redis key holding the failure counter for `ip`.
#[must_use]
pub fn failure_key(ip: &str) -> String {
    format!("lookup_failures:{ip}")
}

/// Whether `failures` has used up the allowance. A limit of zero disables throttling.
#[must_use]
pub const fn is_over_limit(failures: u64, limit: u64) -> bool {
    limit > 0 && failures >= limit
}

/// Parses a comma-separated list of proxy addresses. Invalid entries are skipped.
#[must_use]
pub fn parse_ip_list(raw: &str) -> Vec<IpAddr> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let parsed = entry.parse().ok();
            if parsed.is_none() {
                tracing::warn!(entry, "Ignoring invalid trusted proxy address");
            }
            parsed
        })
        .collect()
}

fn header_ip<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves the client address used as the throttle bucket.
///
/// Forwarding headers are only believed when the socket peer is one of
/// `trusted` proxies. `X-Forwarded-For` is then read right to left, skipping
/// trusted hops, so a client cannot pick its own bucket by prepending
/// addresses. Without a peer every caller shares the `"unknown"` bucket.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };

    if !trusted.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = header_ip(headers, "x-forwarded-for").and_then(|value| {
        value
            .rsplit(',')
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .find(|hop| !trusted.contains(hop))
    });

    forwarded
        .or_else(|| header_ip(headers, "x-real-ip").and_then(|v| v.parse().ok()))
        .unwrap_or(peer)
        .to_string()
}

/// Reserves a lookup attempt for `ip`.
///
/// Returns `Ok(true)` when a slot was taken and must be handed back with
/// [`release_attempt`] if the lookup succeeds, `Ok(false)` when throttling is
/// off or Redis is unavailable, and 429 once the budget is spent.
pub async fn reserve_attempt(conn: &mut Connection, ip: &str) -> AppResult<bool> {
    let limit = APP_CONFIG.lookup_failure_limit;
    if limit == 0 {
        return Ok(false);
    }

    let attempts: u64 = match cmd("EVAL")
        .arg(RESERVE_SCRIPT)
        .arg(1)
        .arg(failure_key(ip))
        .arg(APP_CONFIG.lookup_failure_window_secs.max(1))
        .query_async(conn)
        .await
    {
        Ok(attempts) => attempts,
        Err(e) => {
            tracing::warn!(error = %e, "Lookup throttle unavailable, allowing request");
            return Ok(false);
        }
    };

    // The counter includes this attempt
    if is_over_limit(attempts.saturating_sub(1), limit) {
        tracing::warn!(client_ip = %ip, "Share code lookups throttled");
        return Err(AppError::TooManyRequests(
            "Too many invalid share codes. Please try again later.".to_string(),
        ));
    }

    Ok(true)
}

/// Hands back a reserved slot after a lookup that did not count as a failure.
pub async fn release_attempt(conn: &mut Connection, ip: &str) {
    let result: Result<i64, _> = cmd("EVAL")
        .arg(RELEASE_SCRIPT)
        .arg(1)
        .arg(failure_key(ip))
        .query_async(conn)
        .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, "Failed to release lookup attempt");
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_failure_key() {
        assert_eq!(failure_key("10.0.0.1"), "lookup_failures:10.0.0.1");
    }

    #[test]
    fn test_is_over_limit() {
        assert!(!is_over_limit(0, 10));
        assert!(!is_over_limit(9, 10));
        assert!(is_over_limit(10, 10));
        assert!(is_over_limit(11, 10));
    }

    #[test]
    fn test_zero_limit_disables() {
        assert!(!is_over_limit(u64::MAX, 0));
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    fn trusted() -> Vec<IpAddr> {
        parse_ip_list("10.0.0.2, 10.0.0.3")
    }

    #[test]
    fn test_parse_ip_list() {
        let list = parse_ip_list("10.0.0.2, ::1,, not-an-ip ,192.0.2.1");
        assert_eq!(list.len(), 3);
        assert!(list.contains(&"::1".parse::<IpAddr>().unwrap()));
        assert!(parse_ip_list("").is_empty());
    }

    #[test]
    fn test_client_ip_ignores_headers_from_untrusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));

        assert_eq!(client_ip(&headers, peer("192.0.2.50:4000"), &trusted()), "192.0.2.50");
        assert_eq!(client_ip(&headers, peer("192.0.2.50:4000"), &[]), "192.0.2.50");
    }

    #[test]
    fn test_rotating_forwarded_header_keeps_one_bucket() {
        let buckets: std::collections::HashSet<String> = (0..5)
            .map(|i| {
                let mut headers = HeaderMap::new();
                headers.insert(
                    "x-forwarded-for",
                    HeaderValue::from_str(&format!("10.9.8.{i}")).unwrap(),
                );
                failure_key(&client_ip(&headers, peer("192.0.2.50:4000"), &trusted()))
            })
            .collect();

        assert_eq!(buckets.len(), 1);
        assert!(buckets.contains("lookup_failures:192.0.2.50"));
    }

    #[test]
    fn test_client_ip_trusted_proxy_uses_last_untrusted_hop() {
        let mut headers = HeaderMap::new();
        // 클라이언트가 앞쪽 홉을 위조해도 프록시가 붙인 주소가 사용됨
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("6.6.6.6, 203.0.113.7, 10.0.0.3"),
        );

        assert_eq!(client_ip(&headers, peer("10.0.0.2:4000"), &trusted()), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_trusted_proxy_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_ip(&headers, peer("10.0.0.2:4000"), &trusted()), "198.51.100.1");
    }

    #[test]
    fn test_client_ip_trusted_proxy_garbage_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip, "));
        assert_eq!(client_ip(&headers, peer("10.0.0.2:4000"), &trusted()), "10.0.0.2");
    }

    #[test]
    fn test_client_ip_peer_fallback() {
        assert_eq!(client_ip(&HeaderMap::new(), peer("[::1]:8080"), &[]), "::1");
    }

    #[test]
    fn test_client_ip_without_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_ip(&headers, None, &trusted()), "unknown");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_reservations_hold_limit_under_concurrency() {
        let pool = crate::config::build_cache_pool(&crate::config::redis_url()).unwrap();
        let ip = format!("test-{}", rand::random::<u32>());
        let limit = APP_CONFIG.lookup_failure_limit;

        let attempts = (0..limit * 3).map(|_| {
            let pool = pool.clone();
            let ip = ip.clone();
            tokio::spawn(async move {
                let mut conn = pool.get().await.unwrap();
                reserve_attempt(&mut conn, &ip).await.is_ok()
            })
        });

        let mut allowed = 0;
        for handle in attempts.collect::<Vec<_>>() {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, limit);

        // 성공한 조회는 슬롯을 돌려주지만 음수로 내려가지 않음
        let mut conn = pool.get().await.unwrap();
        let key = failure_key(&ip);
        let _: () = cmd("SET").arg(&key).arg(0).query_async(&mut conn).await.unwrap();
        release_attempt(&mut conn, &ip).await;
        let value: i64 = cmd("GET").arg(&key).query_async(&mut conn).await.unwrap();
        assert_eq!(value, 0);
        let _: () = cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
    }
}
