//! HTTP plumbing around the observability pipeline.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, pipeline composition)
//!     → request.rs (correlation ID assigned and echoed)
//!     → [logging / metrics stages observe]
//!     → routing.rs (matched route template recorded for the observers)
//!     → handler
//! ```

pub mod request;
pub mod routing;
pub mod server;

pub use request::{RequestId, RequestIdCell, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use routing::{matched_route, record_matched_route, RouteCell};
pub use server::HttpServer;
