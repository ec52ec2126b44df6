//! HTTP observability pipeline.
//!
//! Composable tower middleware that wraps request handlers with panic
//! recovery, correlation IDs, structured request logging, and Prometheus
//! request metrics, plus the server and configuration plumbing to run them.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod observer;

#[cfg(test)]
mod test_support;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
