//! Transparent request/response observers.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → request.rs (metadata snapshot, bounded body copy, replayable body)
//!     → handler
//!     → body.rs (write-through body, one completion per response)
//!     → response.rs (status latch, byte count, bounded body copy)
//! ```
//!
//! # Design Decisions
//! - One observer pair per request, owned by the task serving it; no locking
//! - Body copies are bounded by [`MAX_BUFFERED_BODY`] unless configured otherwise

pub mod body;
pub mod request;
pub mod response;

pub use body::{observe_response, ObservedBody};
pub use request::{RequestObserver, RouteFn};
pub use response::ResponseObserver;

/// Default cap for captured request/response body bytes (64 KiB).
pub const MAX_BUFFERED_BODY: usize = 64 << 10;

/// Route label used when the route template cannot be resolved.
pub const UNKNOWN_ROUTE: &str = "unknown";
