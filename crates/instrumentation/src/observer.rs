//! The tracing observer injected into every handler set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use callscope_core::{CallbackHandler, Run, RunId};
use serde_json::{Value, json};

use crate::tracer::{ActiveSpan, Attributes, Tracer};

/// Handler that turns run lifecycle events into spans.
///
/// One span per run: opened on start, closed on end or error.
pub struct TracingObserver {
    tracer: Arc<dyn Tracer>,
    open: Mutex<HashMap<RunId, Box<dyn ActiveSpan>>>,
}

impl TracingObserver {
    pub const NAME: &'static str = "callscope_tracer";

    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    /// Number of runs started but not yet finished.
    pub fn open_spans(&self) -> usize {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take(&self, run: &Run) -> Option<Box<dyn ActiveSpan>> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run.id)
    }
}

fn run_attributes(run: &Run) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("run.id".into(), json!(run.id.to_string()));
    attributes.insert("run.name".into(), json!(run.name));
    attributes.insert("run.kind".into(), json!(run.kind.as_str()));
    if let Some(parent) = run.parent_id {
        attributes.insert("parent_run.id".into(), json!(parent.to_string()));
    }
    if !run.tags.is_empty() {
        attributes.insert("run.tags".into(), json!(run.tags));
    }
    if !run.metadata.is_empty() {
        attributes.insert("run.metadata".into(), Value::Object(run.metadata.clone()));
    }
    attributes
}

impl CallbackHandler for TracingObserver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_run_start(&self, run: &Run) {
        let span = self.tracer.start_span(&run.name, run_attributes(run));
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.id, span);
    }

    fn on_run_end(&self, run: &Run) {
        if let Some(span) = self.take(run) {
            span.end();
        }
    }

    fn on_run_error(&self, run: &Run, error: &str) {
        if let Some(mut span) = self.take(run) {
            span.record_error(error);
            span.end();
        }
    }
}
