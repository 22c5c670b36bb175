//! General API rate limiting and client address resolution.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use clinic_core::audit::{self, AuditAction, AuditEvent};
use clinic_core::ratelimit::RateDecision;

use crate::AppState;
use crate::error::rate_limited_response;

/// Paths under `/api` that are never rate limited.
const EXEMPT_PATHS: &[&str] = &["/api/health"];

/// Client address.
///
/// `X-Forwarded-For` (first hop) and then `X-Real-IP` are honoured only when
/// the socket peer is a configured trusted proxy. Otherwise the peer address
/// is used as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn resolve(parts: &Parts, trusted_proxies: &[IpAddr]) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let behind_proxy = peer.is_some_and(|ip| trusted_proxies.contains(&ip));
        let ip = behind_proxy
            .then(|| forwarded_ip(parts))
            .flatten()
            .or_else(|| peer.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        ClientIp(ip)
    }
}

fn forwarded_ip(parts: &Parts) -> Option<String> {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip").filter(|v| !v.is_empty()))
        .map(str::to_string)
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp::resolve(parts, &state.config.trusted_proxies))
    }
}

/// Axum middleware: applies the two-tier limiter per client address.
pub async fn rate_limit(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let decision = state.limiter.check(&ip);
    match decision {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Throttled { .. } => {
            audit::emit(
                &state.audit,
                AuditEvent::new(AuditAction::ApiRateLimitExceeded)
                    .ip(&ip)
                    .details(request.uri().path()),
            )
            .await;
            rate_limited_response(
                decision.retry_after_secs(),
                "Too many requests. Please try again later.",
            )
        }
        RateDecision::Blocked { newly_blocked, .. } => {
            if newly_blocked {
                audit::emit(
                    &state.audit,
                    AuditEvent::new(AuditAction::ApiBlocked)
                        .ip(&ip)
                        .details("cumulative request threshold exceeded"),
                )
                .await;
            }
            rate_limited_response(
                decision.retry_after_secs(),
                "Your IP has been temporarily blocked due to excessive requests.",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request as HttpRequest;

    use super::*;

    const PROXY: [u8; 4] = [10, 0, 0, 2];

    fn parts(peer: Option<[u8; 4]>, headers: &[(&str, &str)]) -> Parts {
        let mut builder = HttpRequest::builder().uri("/api/x");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let mut parts = builder.body(()).unwrap().into_parts().0;
        if let Some(peer) = peer {
            parts
                .extensions
                .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        }
        parts
    }

    fn trusted() -> Vec<IpAddr> {
        vec![IpAddr::from(PROXY)]
    }

    #[test]
    fn forwarded_for_takes_first_hop_from_a_trusted_proxy() {
        let p = parts(
            Some(PROXY),
            &[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("x-real-ip", "198.51.100.1"),
            ],
        );
        assert_eq!(ClientIp::resolve(&p, &trusted()).0, "203.0.113.7");
    }

    #[test]
    fn real_ip_is_second_choice() {
        let p = parts(Some(PROXY), &[("x-real-ip", "198.51.100.1")]);
        assert_eq!(ClientIp::resolve(&p, &trusted()).0, "198.51.100.1");
    }

    #[test]
    fn spoofed_headers_from_an_untrusted_peer_are_ignored() {
        let p = parts(
            Some([192, 0, 2, 5]),
            &[("x-forwarded-for", "203.0.113.7"), ("x-real-ip", "198.51.100.1")],
        );
        assert_eq!(ClientIp::resolve(&p, &trusted()).0, "192.0.2.5");
        // No proxies configured: headers never count.
        let p = parts(Some(PROXY), &[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(ClientIp::resolve(&p, &[]).0, "10.0.0.2");
    }

    #[test]
    fn socket_peer_is_the_fallback() {
        assert_eq!(ClientIp::resolve(&parts(Some(PROXY), &[]), &trusted()).0, "10.0.0.2");
        let headers_only = parts(None, &[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(ClientIp::resolve(&headers_only, &trusted()).0, "unknown");
    }
}
