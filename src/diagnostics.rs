//! Diagnostics capability handed to every pipeline stage.
//!
//! Stages never call the logging macros for recoverable failures directly;
//! they record through a [`DiagnosticSink`] so tests can swap in a
//! [`MemorySink`] and assert on what was reported.

use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub component: &'static str,
    pub message: String,
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, component: &'static str, message: &str);
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, component: &'static str, message: &str) {
        tracing::warn!(component, "{}", message);
    }
}

/// Captures diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, component: &str, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|d| d.component == component && d.message.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, component: &'static str, message: &str) {
        let entry = Diagnostic {
            component,
            message: message.to_string(),
        };
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_captures_in_order() {
        let sink = MemorySink::new();
        sink.record("question_log", "first");
        sink.record("reply_sender", "second");
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].component, "question_log");
        assert!(sink.contains("reply_sender", "sec"));
        assert!(!sink.contains("question_log", "second"));
    }
}
