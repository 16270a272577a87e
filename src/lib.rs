//! # ratekeeper
//!
//! Pluggable rate limiting core: five decision algorithms over an abstract
//! per-key state store, bound to an HTTP pipeline through an axum
//! middleware.
//!
//! - **Algorithms**: token bucket, leaking bucket, fixed window, sliding
//!   window log, sliding window counter
//! - **Backends**: in-process ([`storage::MemoryBackend`]) and distributed
//!   ([`storage::RedisBackend`])
//! - **Fail-open**: a storage failure forwards the request instead of
//!   answering 5xx
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Extension, Router};
//! use ratekeeper::{Algorithm, LimiterConfig, RateLimitMiddleware};
//! use ratekeeper::middleware::rate_limit_middleware;
//! use ratekeeper::storage::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> ratekeeper::error::Result<()> {
//!     let limiter = RateLimitMiddleware::new(
//!         LimiterConfig::new(Algorithm::TokenBucket, 100, 60_000),
//!         MemoryBackend::start(),
//!     )?;
//!
//!     let app: Router = Router::new()
//!         .route("/", get(|| async { "hello" }))
//!         .layer(middleware::from_fn(rate_limit_middleware))
//!         .layer(Extension(limiter));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod stats;
pub mod storage;

// Re-export the types most embedders touch
pub use algorithms::{Decision, RateLimitAlgorithm};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Algorithm, LimiterConfig};
pub use error::{LimiterError, Result};
pub use middleware::RateLimitMiddleware;
pub use stats::{StatsRegistry, StatsSnapshot};
pub use storage::{MemoryBackend, RedisBackend, StorageBackend};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratekeeper=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
