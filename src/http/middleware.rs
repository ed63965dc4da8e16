//! Axum middleware that throttles recognized crawlers.
//!
//! Unrecognized clients pass through untouched. Recognized ones are counted
//! per (identity, source address); admitted responses carry rate limit
//! headers and rejected requests get a 429 with a JSON body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

use super::paths::PathFilter;
use crate::config::BotThrottleConfig;
use crate::ratelimit::{
    AdmissionDecision, Clock, IdentityRegistry, RateLimitKey, RateLimiterBackend, UNKNOWN_ADDRESS,
};

pub const X_BOT_DETECTED: HeaderName = HeaderName::from_static("x-bot-detected");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Result of checking one request from a recognized crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCheck {
    /// Identity name
    pub bot: String,
    /// Configured quota for the identity
    pub limit: u64,
    /// The admission decision
    pub decision: AdmissionDecision,
}

impl BotCheck {
    /// Write the rate limit headers for this check.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        if let Ok(val) = HeaderValue::from_str(&self.bot) {
            headers.insert(X_BOT_DETECTED, val);
        }
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(
            X_RATELIMIT_REMAINING,
            HeaderValue::from(self.decision.remaining),
        );
        headers.insert(
            X_RATELIMIT_RESET,
            HeaderValue::from(self.decision.reset_unix_secs()),
        );
    }

    /// Build the 429 response for a denied check.
    pub fn into_throttled_response(self) -> Response {
        let retry_after = self.decision.retry_after_secs.unwrap_or(0);
        let body = ThrottledBody {
            error: "Too Many Requests",
            message: format!("Rate limit exceeded for {}", self.bot),
            bot: &self.bot,
            limit: self.limit,
            retry_after,
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        self.apply_headers(headers);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}

/// JSON body of a 429 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThrottledBody<'a> {
    error: &'static str,
    message: String,
    bot: &'a str,
    limit: u64,
    retry_after: u64,
}

/// Shared state of the throttling middleware.
pub struct BotThrottle {
    /// Global switch; when off no request is inspected
    enabled: bool,
    /// Known identities
    registry: IdentityRegistry,
    /// Counter backend
    limiter: Arc<dyn RateLimiterBackend>,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Paths subject to filtering
    paths: PathFilter,
}

impl BotThrottle {
    /// Create the middleware state from configuration.
    pub fn new(
        config: &BotThrottleConfig,
        limiter: Arc<dyn RateLimiterBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            registry: config.identities.clone(),
            limiter,
            clock,
            paths: PathFilter::from(&config.paths),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classify a request and, for recognized crawlers, consume quota.
    ///
    /// Returns `None` when the request should pass through untouched: the
    /// filter is disabled, the path is excluded, or the user agent matches
    /// no identity. No counter state is touched in those cases.
    pub fn check(&self, path: &str, user_agent: Option<&str>, address: &str) -> Option<BotCheck> {
        if !self.enabled || !self.paths.applies(path) {
            return None;
        }

        let identity = self.registry.classify(user_agent)?;
        let key = RateLimitKey::new(identity.name, address);
        let decision = self
            .limiter
            .check_and_consume(&key, identity.quota, self.clock.now());

        Some(BotCheck {
            bot: identity.name.to_string(),
            limit: identity.quota,
            decision,
        })
    }
}

/// Best-effort source address of a request.
///
/// Prefers the connection peer, then the first `X-Forwarded-For` entry,
/// then `X-Real-IP`, and finally the `unknown` sentinel.
pub fn source_address(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    let headers = request.headers();
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get(X_REAL_IP)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(UNKNOWN_ADDRESS)
        .to_string()
}

/// Axum middleware function.
pub async fn bot_throttle_middleware(
    State(throttle): State<Arc<BotThrottle>>,
    request: Request,
    next: Next,
) -> Response {
    if !throttle.is_enabled() {
        return next.run(request).await;
    }

    let address = source_address(&request);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .map(|v| String::from_utf8_lossy(v.as_bytes()));

    let Some(check) = throttle.check(request.uri().path(), user_agent.as_deref(), &address) else {
        return next.run(request).await;
    };

    if !check.decision.allowed {
        warn!(
            bot = %check.bot,
            address = %address,
            path = %request.uri().path(),
            limit = check.limit,
            retry_after = check.decision.retry_after_secs,
            "Bot rate limit exceeded"
        );
        return check.into_throttled_response();
    }

    debug!(
        bot = %check.bot,
        address = %address,
        remaining = check.decision.remaining,
        "Bot request allowed"
    );

    let mut response = next.run(request).await;
    check.apply_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{CounterStore, IdentityRule, MockClock, WindowLimiter};
    use axum::body::Body;
    use chrono::{DateTime, Duration};

    fn start() -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn throttle(enabled: bool) -> (BotThrottle, Arc<CounterStore>) {
        let config = BotThrottleConfig {
            enabled,
            identities: IdentityRegistry::new(vec![IdentityRule::new("TestBot", 2)]),
            ..BotThrottleConfig::default()
        };
        let store = Arc::new(CounterStore::new());
        let limiter = Arc::new(WindowLimiter::new(store.clone(), config.window()));
        let throttle = BotThrottle::new(&config, limiter, Arc::new(MockClock::new(start())));
        (throttle, store)
    }

    #[test]
    fn test_check_recognized_bot() {
        let (throttle, store) = throttle(true);

        let check = throttle.check("/", Some("TestBot/1.0"), "1.2.3.4").unwrap();

        assert_eq!(check.bot, "TestBot");
        assert_eq!(check.limit, 2);
        assert!(check.decision.allowed);
        assert_eq!(check.decision.remaining, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_check_unrecognized_touches_nothing() {
        let (throttle, store) = throttle(true);

        assert!(throttle.check("/", Some("curl/7.0"), "1.2.3.4").is_none());
        assert!(throttle.check("/", None, "1.2.3.4").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_check_disabled_touches_nothing() {
        let (throttle, store) = throttle(false);

        assert!(throttle.check("/", Some("TestBot/1.0"), "1.2.3.4").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_check_excluded_path() {
        let (throttle, store) = throttle(true);

        assert!(throttle
            .check("/_next/static/app.js", Some("TestBot/1.0"), "1.2.3.4")
            .is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_headers() {
        let check = BotCheck {
            bot: "TestBot".to_string(),
            limit: 2,
            decision: AdmissionDecision {
                allowed: true,
                remaining: 1,
                reset_at: start() + Duration::seconds(60),
                retry_after_secs: None,
            },
        };
        let mut headers = HeaderMap::new();
        check.apply_headers(&mut headers);

        assert_eq!(headers[X_BOT_DETECTED], "TestBot");
        assert_eq!(headers[X_RATELIMIT_LIMIT], "2");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "1");
        assert_eq!(headers[X_RATELIMIT_RESET], "1700000060");
        assert!(headers.get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_throttled_response() {
        let check = BotCheck {
            bot: "TestBot".to_string(),
            limit: 2,
            decision: AdmissionDecision {
                allowed: false,
                remaining: 0,
                reset_at: start() + Duration::seconds(60),
                retry_after_secs: Some(58),
            },
        };

        let response = check.into_throttled_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::RETRY_AFTER], "58");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_BOT_DETECTED], "TestBot");
    }

    #[test]
    fn test_source_address_priority() {
        let request = axum::http::Request::builder()
            .header(X_FORWARDED_FOR, "10.0.0.1, 10.0.0.2")
            .header(X_REAL_IP, "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(source_address(&request), "10.0.0.1");

        let mut request = request;
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4000))));
        assert_eq!(source_address(&request), "192.168.1.5");

        let request = axum::http::Request::builder()
            .header(X_REAL_IP, "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(source_address(&request), "10.0.0.9");

        let request = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(source_address(&request), UNKNOWN_ADDRESS);
    }
}
