//! Request middleware: rate limit enforcement and request logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, error, info};

use crate::error::{Result, WindowGuardError};
use crate::ratelimit::{Clock, Decision, GuardedLimiter, RateLimiterConfig, Verdict};

/// Key used when neither a forwarded address nor a peer address is known.
const UNKNOWN_CLIENT: &str = "unknown";

/// Which requests count against the limit.
#[derive(Debug, Clone)]
pub struct ProtectedRoute {
    methods: Vec<Method>,
    path_fragment: String,
}

impl ProtectedRoute {
    pub fn new<S: AsRef<str>>(methods: &[S], path_fragment: impl Into<String>) -> Result<Self> {
        let methods = methods
            .iter()
            .map(|m| {
                let m = m.as_ref().trim().to_ascii_uppercase();
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| WindowGuardError::Config(format!("Invalid HTTP method: {:?}", m)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            methods,
            path_fragment: path_fragment.into(),
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.methods.contains(method) && path.contains(&self.path_fragment)
    }
}

/// Shared state for [`enforce_rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<GuardedLimiter>,
    clock: Arc<dyn Clock>,
    route: ProtectedRoute,
}

impl RateLimitState {
    pub fn new(limiter: Arc<GuardedLimiter>, clock: Arc<dyn Clock>, route: ProtectedRoute) -> Self {
        Self {
            limiter,
            clock,
            route,
        }
    }
}

/// Derive the rate limit key for a request.
///
/// Uses the first non-empty entry of `X-Forwarded-For`, then the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
}

/// Human-readable rejection text, e.g. "Rate limit exceeded: Max 5 messages per 1 minute(s)."
pub fn rejection_detail(limits: &RateLimiterConfig) -> String {
    let window = limits.window_seconds();
    let period = if window % 60.0 == 0.0 {
        format!("{} minute(s)", (window / 60.0) as u64)
    } else if window.fract() == 0.0 {
        format!("{} second(s)", window as u64)
    } else {
        format!("{} second(s)", window)
    };

    format!(
        "Rate limit exceeded: Max {} messages per {}.",
        limits.max_events(),
        period
    )
}

fn too_many_requests(limits: &RateLimiterConfig, retry_after: f64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "detail": rejection_detail(limits) })),
    )
        .into_response();

    let seconds = retry_after.max(0.0).ceil() as u64;
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    response
}

/// Admit or reject protected requests before they reach the handler.
pub async fn enforce_rate_limit(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.route.matches(req.method(), req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_key(req.headers(), peer_addr(&req));
    let now = state.clock.now();

    match state.limiter.check(&key, now).await {
        Ok(Decision::Verdict(Verdict::Admitted { remaining })) => {
            debug!(client = %key, remaining = remaining, "Request admitted");
            next.run(req).await
        }
        Ok(Decision::Verdict(Verdict::Rejected { retry_after })) => {
            info!(client = %key, retry_after = retry_after, "Request rejected by rate limit");
            too_many_requests(&state.limiter.limits(), retry_after)
        }
        Ok(Decision::Bypassed { reason }) => {
            debug!(client = %key, reason = %reason, "Rate limit bypassed");
            next.run(req).await
        }
        Err(e) => {
            error!(client = %key, error = %e, "Rate limit check failed");
            e.into_response()
        }
    }
}

/// Log one line per request with its outcome.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = client_key(req.headers(), peer_addr(&req));
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        client = %client,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handled request"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        FailurePolicy, ManualClock, RateLimitBackend, SlidingWindowRateLimiter, Snapshot,
    };
    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use axum::{body::Body, middleware, routing::post, Router};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn limits(max_events: u32, window_seconds: f64) -> RateLimiterConfig {
        RateLimiterConfig::new(max_events, window_seconds).unwrap()
    }

    fn app(backend: Arc<dyn RateLimitBackend>, clock: Arc<ManualClock>, policy: FailurePolicy) -> Router {
        let guarded = Arc::new(GuardedLimiter::new(backend, Duration::from_millis(50), policy));
        let route = ProtectedRoute::new(&["POST"], "/messages").unwrap();
        let state = RateLimitState::new(guarded, clock, route);

        Router::new()
            .route(
                "/conversations/{id}/messages",
                post(|| async { StatusCode::CREATED }).get(|| async { "listing" }),
            )
            .route("/profile", post(|| async { StatusCode::OK }))
            .layer(middleware::from_fn_with_state(state, enforce_rate_limit))
    }

    fn local_app(max_events: u32, clock: Arc<ManualClock>) -> Router {
        let backend = Arc::new(SlidingWindowRateLimiter::new(limits(max_events, 60.0)));
        app(backend, clock, FailurePolicy::FailClosed)
    }

    fn post_message(ip: &str) -> Request {
        HttpRequest::builder()
            .method("POST")
            .uri("/conversations/1/messages")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    struct DownBackend;

    #[async_trait]
    impl RateLimitBackend for DownBackend {
        async fn check(&self, _key: &str, _now: f64) -> Result<Verdict> {
            Err(WindowGuardError::BackendUnavailable("store offline".to_string()))
        }

        async fn reset(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn snapshot(&self, _key: &str) -> Result<Snapshot> {
            Ok(Snapshot {
                count: 0,
                oldest: None,
            })
        }

        fn limits(&self) -> RateLimiterConfig {
            RateLimiterConfig::new(5, 60.0).unwrap()
        }
    }

    #[test]
    fn test_client_key_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn test_client_key_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , "));
        let peer: SocketAddr = "192.168.1.5:4000".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(client_key(&HeaderMap::new(), Some(peer)), "192.168.1.5");
        assert_eq!(client_key(&HeaderMap::new(), None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_rejection_detail_text() {
        assert_eq!(
            rejection_detail(&limits(5, 60.0)),
            "Rate limit exceeded: Max 5 messages per 1 minute(s)."
        );
        assert_eq!(
            rejection_detail(&limits(100, 3600.0)),
            "Rate limit exceeded: Max 100 messages per 60 minute(s)."
        );
        assert_eq!(
            rejection_detail(&limits(3, 30.0)),
            "Rate limit exceeded: Max 3 messages per 30 second(s)."
        );
        assert_eq!(
            rejection_detail(&limits(3, 1.5)),
            "Rate limit exceeded: Max 3 messages per 1.5 second(s)."
        );
    }

    #[test]
    fn test_protected_route_matching() {
        let route = ProtectedRoute::new(&["post", " PUT "], "/messages").unwrap();

        assert!(route.matches(&Method::POST, "/api/conversations/3/messages/"));
        assert!(route.matches(&Method::PUT, "/messages"));
        assert!(!route.matches(&Method::GET, "/messages"));
        assert!(!route.matches(&Method::POST, "/conversations"));
        assert!(ProtectedRoute::new(&["BAD METHOD"], "/messages").is_err());
    }

    #[tokio::test]
    async fn test_sixth_post_in_a_minute_is_rejected() {
        let clock = Arc::new(ManualClock::new(0.0));
        let app = local_app(5, clock.clone());

        for _ in 0..5 {
            let response = app.clone().oneshot(post_message("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
            clock.advance(1.0);
        }

        let response = app.clone().oneshot(post_message("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "55");
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Rate limit exceeded: Max 5 messages per 1 minute(s)." })
        );

        // Another client is unaffected
        let response = app.clone().oneshot(post_message("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Once the first post ages out there is room again
        clock.set(60.0);
        let response = app.oneshot(post_message("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_unprotected_requests_pass_through() {
        let clock = Arc::new(ManualClock::new(0.0));
        let app = local_app(0, clock);

        let get = HttpRequest::builder()
            .method("GET")
            .uri("/conversations/1/messages")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(get).await.unwrap().status(), StatusCode::OK);

        let other = HttpRequest::builder()
            .method("POST")
            .uri("/profile")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(other).await.unwrap().status(), StatusCode::OK);

        let limited = app.oneshot(post_message("1.2.3.4")).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_peer_address_used_without_forwarded_header() {
        let clock = Arc::new(ManualClock::new(0.0));
        let app = local_app(1, clock);

        let request = |port: u16| {
            let mut req = HttpRequest::builder()
                .method("POST")
                .uri("/conversations/1/messages")
                .body(Body::empty())
                .unwrap();
            let addr: SocketAddr = ([10, 0, 0, 9], port).into();
            req.extensions_mut().insert(ConnectInfo(addr));
            req
        };

        assert_eq!(app.clone().oneshot(request(1000)).await.unwrap().status(), StatusCode::CREATED);
        // Same host from another port shares the bucket
        assert_eq!(
            app.oneshot(request(2000)).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_backend_down_fail_closed_returns_503() {
        let app = app(
            Arc::new(DownBackend),
            Arc::new(ManualClock::new(0.0)),
            FailurePolicy::FailClosed,
        );

        let response = app.oneshot(post_message("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Rate limiter unavailable." })
        );
    }

    #[tokio::test]
    async fn test_backend_down_fail_open_admits() {
        let app = app(
            Arc::new(DownBackend),
            Arc::new(ManualClock::new(0.0)),
            FailurePolicy::FailOpen,
        );

        let response = app.oneshot(post_message("1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
