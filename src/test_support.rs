//! Helpers shared by unit tests: a log capture layer and an in-memory
//! metrics provider.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::observability::metrics::{HttpRequestLabels, MetricsProvider};

/// One captured log event.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Layer recording every event it sees.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedLogs {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message == message)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

/// Capture log events emitted on the current thread until the guard drops.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(logs.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

/// In-memory [`MetricsProvider`].
#[derive(Default)]
pub struct RecordingMetrics {
    requests: Mutex<Vec<HttpRequestLabels>>,
    durations: Mutex<Vec<(HttpRequestLabels, Duration)>>,
}

impl RecordingMetrics {
    pub fn requests(&self) -> Vec<HttpRequestLabels> {
        self.requests.lock().unwrap().clone()
    }

    pub fn durations(&self) -> Vec<(HttpRequestLabels, Duration)> {
        self.durations.lock().unwrap().clone()
    }
}

impl MetricsProvider for RecordingMetrics {
    fn inc_requests(&self, labels: &HttpRequestLabels) {
        self.requests.lock().unwrap().push(labels.clone());
    }

    fn observe_duration(&self, labels: &HttpRequestLabels, duration: Duration) {
        self.durations
            .lock()
            .unwrap()
            .push((labels.clone(), duration));
    }
}
