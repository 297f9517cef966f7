//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`metrics`]: Prometheus request metrics and domain counters.
//!
//! Request tracing uses `tower_http::trace::TraceLayer` directly in [`crate::app`].

pub mod metrics;
