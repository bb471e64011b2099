//! The "create a unit of tracing work" capability.
//!
//! Export is out of scope: a [`Tracer`] only starts spans. [`LogTracer`]
//! forwards finished spans to the `tracing` diagnostic channel and
//! [`InMemoryTracer`] keeps them for tests/dev.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Span attributes (key → JSON value).
pub type Attributes = Map<String, Value>;

/// A span that has been started and not yet ended.
pub trait ActiveSpan: Send {
    fn set_attribute(&mut self, key: &str, value: Value);

    fn record_error(&mut self, message: &str);

    /// Finish the span. Dropping a span without ending it discards it.
    fn end(self: Box<Self>);
}

/// Starts spans.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: Attributes) -> Box<dyn ActiveSpan>;
}

/// Tracer that reports finished spans through `tracing`.
#[derive(Debug, Clone)]
pub struct LogTracer {
    scope: String,
    version: String,
}

impl LogTracer {
    pub fn new(scope: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            version: version.into(),
        }
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str, attributes: Attributes) -> Box<dyn ActiveSpan> {
        Box::new(LogSpan {
            scope: self.scope.clone(),
            version: self.version.clone(),
            name: name.to_string(),
            attributes,
            error: None,
            started_at: Utc::now(),
        })
    }
}

struct LogSpan {
    scope: String,
    version: String,
    name: String,
    attributes: Attributes,
    error: Option<String>,
    started_at: DateTime<Utc>,
}

impl ActiveSpan for LogSpan {
    fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    fn record_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn end(self: Box<Self>) {
        let LogSpan {
            scope,
            version,
            name,
            attributes,
            error,
            started_at,
        } = *self;
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
        let attributes = Value::Object(attributes);
        match error {
            Some(error) => tracing::warn!(
                target: "callscope::span",
                scope = %scope,
                scope_version = %version,
                %attributes,
                elapsed_ms,
                "span {} failed: {}",
                name,
                error
            ),
            None => tracing::info!(
                target: "callscope::span",
                scope = %scope,
                scope_version = %version,
                %attributes,
                elapsed_ms,
                "span {} ended",
                name
            ),
        }
    }
}

/// A span as recorded by [`InMemoryTracer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedSpan {
    pub name: String,
    pub attributes: Attributes,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Tracer that keeps finished spans in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Tracer for InMemoryTracer {
    fn start_span(&self, name: &str, attributes: Attributes) -> Box<dyn ActiveSpan> {
        Box::new(InMemorySpan {
            sink: self.finished.clone(),
            name: name.to_string(),
            attributes,
            error: None,
            started_at: Utc::now(),
        })
    }
}

struct InMemorySpan {
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
    name: String,
    attributes: Attributes,
    error: Option<String>,
    started_at: DateTime<Utc>,
}

impl ActiveSpan for InMemorySpan {
    fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    fn record_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn end(self: Box<Self>) {
        let span = *self;
        let finished = FinishedSpan {
            name: span.name,
            attributes: span.attributes,
            error: span.error,
            started_at: span.started_at,
            ended_at: Utc::now(),
        };
        span.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(finished);
    }
}
