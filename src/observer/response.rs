//! Response observation.
//!
//! # Responsibilities
//! - Latch the response status on the first header or body write
//! - Count every byte the sink accepted
//! - Optionally keep a capped copy (tee) of the body for logging
//!
//! # Design Decisions
//! - The observer never sits in the data path on its own; [`ObservedBody`]
//!   forwards each frame to the real sink and reports it here afterwards
//! - Bytes past the capture cap still reach the client, they are only dropped
//!   from the copy
//!
//! [`ObservedBody`]: crate::observer::ObservedBody

use axum::http::StatusCode;

use crate::observer::MAX_BUFFERED_BODY;

/// Records what a handler wrote into one outgoing response.
#[derive(Debug)]
pub struct ResponseObserver {
    status: Option<StatusCode>,
    size: u64,
    body: Option<Vec<u8>>,
    limit: usize,
    panicked: bool,
}

impl ResponseObserver {
    /// Create an observer; `capture_body` enables the tee buffer.
    pub fn new(capture_body: bool) -> Self {
        Self::with_limit(capture_body, MAX_BUFFERED_BODY)
    }

    /// Create an observer with a custom capture cap.
    pub fn with_limit(capture_body: bool, limit: usize) -> Self {
        Self {
            status: None,
            size: 0,
            body: capture_body.then(Vec::new),
            limit,
            panicked: false,
        }
    }

    /// Record an explicit status write. Only the first one counts.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    /// Record `chunk` as accepted by the sink.
    ///
    /// A body write without a prior status write latches the implicit `200 OK`.
    pub fn write(&mut self, chunk: &[u8]) {
        self.write_header(StatusCode::OK);
        self.size += chunk.len() as u64;

        if let Some(buf) = self.body.as_mut() {
            let room = self.limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    /// Record that the body source panicked while being written.
    pub fn mark_panicked(&mut self) {
        self.panicked = true;
    }

    /// True when the body source panicked mid-stream.
    pub fn panicked(&self) -> bool {
        self.panicked
    }

    /// True once a status has been latched.
    pub fn is_started(&self) -> bool {
        self.status.is_some()
    }

    /// The latched status, or `200 OK` when nothing was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Cumulative number of body bytes accepted by the sink.
    pub fn body_size(&self) -> u64 {
        self.size
    }

    /// The captured prefix of the body; empty when capture is disabled.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// The captured prefix of the body as text (lossy UTF-8).
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(self.body_bytes()).into_owned()
    }
}
