//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (request counter and latency histogram)
//!
//! Consumers:
//!     → stdout (JSON or pretty)
//!     → GET /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every record
//! - Metric updates go through the `metrics` facade (atomic increments)

pub mod logging;
pub mod metrics;

pub use self::logging::{log_startup_banner, BuildInfo, LogFormat};
pub use self::metrics::{HttpRequestLabels, MetricsProvider, PrometheusMetrics};
