//! Request-interception middleware.
//!
//! Glues an algorithm instance and a storage backend onto an axum request
//! pipeline: derive a client key, consult the algorithm, stamp the
//! standard `X-RateLimit-*` headers, and either forward the request or
//! answer with a JSON rejection. A storage failure never surfaces to the
//! client; the middleware fails open and forwards.

use crate::algorithms::{build_algorithm, Decision, RateLimitAlgorithm};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::Result;
use crate::stats::StatsRegistry;
use crate::storage::StorageBackend;
use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat};
use metrics::counter;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Pluggable client-key derivation
pub type KeyExtractor = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Derive the client key from the forwarded-for chain, falling back to
/// the peer address, then to the literal `"unknown"`.
///
/// The leftmost `X-Forwarded-For` entry is client-controlled unless every
/// fronting proxy is trusted to overwrite it; only rely on it when the
/// server knows its proxies, otherwise install an extractor that uses the
/// peer address or an authenticated principal.
pub fn default_key_extractor(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware state
///
/// Cheap to clone; clones share the algorithm, backend, stats registry
/// and clock.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    algorithm: Arc<dyn RateLimitAlgorithm>,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsRegistry>,
    key_extractor: KeyExtractor,
    config: LimiterConfig,
}

impl RateLimitMiddleware {
    /// Build a middleware from a configuration and a storage backend.
    ///
    /// Fails if the configuration is invalid; an unbuildable limiter is
    /// preferable to one that silently misbehaves.
    pub fn new(config: LimiterConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let algorithm = build_algorithm(&config, backend.clone())?;
        Ok(Self {
            algorithm,
            backend,
            clock: Arc::new(SystemClock),
            stats: Arc::new(StatsRegistry::new()),
            key_extractor: Arc::new(default_key_extractor),
            config,
        })
    }

    /// Replace the clock (deterministic clocks for tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the key extractor.
    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    /// Share a stats registry across several limiter instances.
    pub fn with_stats(mut self, stats: Arc<StatsRegistry>) -> Self {
        self.stats = stats;
        self
    }

    /// The stats registry this middleware records into.
    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.stats.clone()
    }

    /// Zero the stats and drop all rate limit state from the backend.
    pub async fn reset(&self) -> Result<()> {
        self.stats.reset();
        self.backend.reset().await
    }

    /// Apply rate limiting to one request.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let key = (self.key_extractor)(&request);
        self.stats.observe_key(&key);

        let decision = match self.algorithm.check(&key, self.clock.now_millis()).await {
            Ok(decision) => decision,
            Err(e) => {
                // Fail open: a broken limiter must not take the service
                // down. No headers, no stats for this request.
                error!(error = %e, key, "Rate limit check failed, forwarding request");
                counter!("ratekeeper_fail_open_total").increment(1);
                return next.run(request).await;
            }
        };

        self.stats.record(self.algorithm.kind(), decision.allowed);

        if decision.allowed {
            debug!(
                key,
                remaining = decision.remaining,
                "Rate limit check passed"
            );
            let mut response = next.run(request).await;
            if self.config.emit_headers {
                set_rate_limit_headers(response.headers_mut(), &decision);
            }
            response
        } else {
            warn!(
                key,
                algorithm = self.algorithm.kind().as_str(),
                "Rate limit exceeded"
            );
            counter!(
                "ratekeeper_rejected_total",
                "algorithm" => self.algorithm.kind().as_str()
            )
            .increment(1);
            self.rejection_response(&decision)
        }
    }

    /// Build the early rejection response for a blocked decision.
    fn rejection_response(&self, decision: &Decision) -> Response {
        let mut headers = HeaderMap::new();
        if self.config.emit_headers {
            set_rate_limit_headers(&mut headers, decision);
        }

        let reset_time = DateTime::from_timestamp(decision.reset_at_secs as i64, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        let body = Json(serde_json::json!({
            "error": self.config.message(),
            "retryAfter": decision.retry_after_secs.unwrap_or(1),
            "limit": decision.limit,
            "remaining": 0,
            "resetTime": reset_time,
        }));

        let status = StatusCode::from_u16(self.config.status_code)
            .unwrap_or(StatusCode::TOO_MANY_REQUESTS);

        (status, headers, body).into_response()
    }
}

/// Stamp `X-RateLimit-*` (and `Retry-After` when present) onto a header map.
fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_at_secs));
    if let Some(retry_after) = decision.retry_after_secs {
        headers.insert("Retry-After", HeaderValue::from(retry_after));
    }
}

/// Add rate limit headers to a response the embedder built itself.
pub fn add_rate_limit_headers(mut response: Response, decision: &Decision) -> Response {
    set_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Axum middleware function for rate limiting.
///
/// Reads the [`RateLimitMiddleware`] from request extensions; requests
/// with no limiter configured pass through untouched.
///
/// ```rust,no_run
/// use axum::{middleware, routing::get, Extension, Router};
/// use ratekeeper::config::{Algorithm, LimiterConfig};
/// use ratekeeper::middleware::{rate_limit_middleware, RateLimitMiddleware};
/// use ratekeeper::storage::MemoryBackend;
///
/// # fn build() -> ratekeeper::error::Result<Router> {
/// let limiter = RateLimitMiddleware::new(
///     LimiterConfig::new(Algorithm::SlidingWindowLog, 100, 60_000),
///     MemoryBackend::start(),
/// )?;
///
/// let app = Router::new()
///     .route("/", get(|| async { "hello" }))
///     .layer(middleware::from_fn(rate_limit_middleware))
///     .layer(Extension(limiter));
/// # Ok(app)
/// # }
/// ```
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimitMiddleware>().cloned();

    match limiter {
        Some(limiter) => limiter.handle(request, next).await,
        None => next.run(request).await,
    }
}
