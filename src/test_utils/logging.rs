//! Structured log capture for test assertions.
//!
//! Tests call [`init_test_logging`] once, run the code under test, then
//! assert on what was logged: the connectivity-skip and flush-failure
//! paths promise loud logging rather than errors, and that promise is
//! only testable by capturing the events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static LOG_STORAGE: OnceLock<Arc<Mutex<LogStorage>>> = OnceLock::new();

/// One captured event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(level: Level, target: &str, message: &str) -> Self {
        Self {
            level,
            target: target.to_string(),
            message: message.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }
}

/// Bounded in-memory event store shared by every test in the binary.
#[derive(Default)]
pub struct LogStorage {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogStorage {
    pub const fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub const fn entries(&self) -> &VecDeque<LogEntry> {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_message(&self, message: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(message))
    }

    pub fn contains_level(&self, level: Level) -> bool {
        self.entries.iter().any(|e| e.level == level)
    }

    pub fn has_errors(&self) -> bool {
        self.contains_level(Level::ERROR)
    }

    pub fn has_warnings(&self) -> bool {
        self.contains_level(Level::WARN)
    }

    pub fn filter_by_level(&self, level: Level) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }
}

pub fn get_log_storage() -> Arc<Mutex<LogStorage>> {
    LOG_STORAGE
        .get_or_init(|| Arc::new(Mutex::new(LogStorage::new(1000))))
        .clone()
}

pub fn clear_logs() {
    if let Ok(mut storage) = get_log_storage().lock() {
        storage.clear();
    }
}

pub fn get_logs() -> Vec<LogEntry> {
    get_log_storage()
        .lock()
        .map(|storage| storage.entries().iter().cloned().collect())
        .unwrap_or_default()
}

pub fn logs_contain(message: &str) -> bool {
    get_log_storage()
        .lock()
        .map(|storage| storage.contains_message(message))
        .unwrap_or(false)
}

pub fn logs_have_errors() -> bool {
    get_log_storage()
        .lock()
        .map(|storage| storage.has_errors())
        .unwrap_or(false)
}

pub fn logs_have_warnings() -> bool {
    get_log_storage()
        .lock()
        .map(|storage| storage.has_warnings())
        .unwrap_or(false)
}

/// Render captured logs for a failure message.
pub fn format_logs_for_display() -> String {
    let logs = get_logs();
    if logs.is_empty() {
        return String::from("no logs captured");
    }

    let mut output = format!("captured {} log entries:\n", logs.len());
    for entry in logs {
        output.push_str(&format!(
            "  [{}] {}: {}\n",
            entry.level, entry.target, entry.message
        ));
        for (key, value) in &entry.fields {
            output.push_str(&format!("      {key} = {value}\n"));
        }
    }
    output
}

/// Layer feeding captured events into the shared storage.
pub struct CaptureLayer {
    storage: Arc<Mutex<LogStorage>>,
}

impl CaptureLayer {
    pub const fn new(storage: Arc<Mutex<LogStorage>>) -> Self {
        Self { storage }
    }
}

impl<S> tracing_subscriber::Layer<S> for CaptureLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let mut message = String::new();
        let mut fields = Vec::new();

        struct FieldVisitor<'a> {
            message: &'a mut String,
            fields: &'a mut Vec<(String, String)>,
        }

        impl tracing::field::Visit for FieldVisitor<'_> {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    *self.message = value.to_string();
                } else {
                    self.fields
                        .push((field.name().to_string(), value.to_string()));
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let rendered = format!("{value:?}");
                if field.name() == "message" {
                    *self.message = rendered;
                } else {
                    self.fields.push((field.name().to_string(), rendered));
                }
            }
        }

        event.record(&mut FieldVisitor {
            message: &mut message,
            fields: &mut fields,
        });

        let mut entry = LogEntry::new(*metadata.level(), metadata.target(), &message);
        entry.fields = fields;
        if let Ok(mut storage) = self.storage.lock() {
            storage.push(entry);
        }
    }
}

/// Install the capture subscriber and clear previously captured logs.
///
/// The returned guard prints the captured logs when the test panics.
/// Setting the global subscriber can only happen once per process; later
/// calls keep the already-installed one, which shares the same storage.
#[must_use]
pub fn init_test_logging(level: &str) -> TestLoggingGuard {
    let storage = get_log_storage();
    if let Ok(mut s) = storage.lock() {
        s.clear();
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(CaptureLayer::new(storage));
    let _ = tracing::subscriber::set_global_default(subscriber);

    TestLoggingGuard {
        start_time: Instant::now(),
    }
}

/// Prints captured logs on panic so failing async tests keep context.
pub struct TestLoggingGuard {
    start_time: Instant,
}

impl TestLoggingGuard {
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Drop for TestLoggingGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            eprintln!("test failed after {:?}", self.elapsed());
            eprintln!("{}", format_logs_for_display());
        }
    }
}

// =============================================================================
// Assertion macros
// =============================================================================

/// Assert that a log entry with the given level contains the message.
#[macro_export]
macro_rules! assert_log_contains {
    ($level:expr, $message:expr) => {{
        let logs = $crate::test_utils::logging::get_logs();
        let found = logs
            .iter()
            .any(|e| e.level == $level && e.message.contains($message));
        assert!(
            found,
            "expected a {} log containing '{}'\n{}",
            $level,
            $message,
            $crate::test_utils::logging::format_logs_for_display()
        );
    }};
}

/// Assert that no error-level events were captured.
#[macro_export]
macro_rules! assert_no_errors {
    () => {{
        assert!(
            !$crate::test_utils::logging::logs_have_errors(),
            "expected no error logs\n{}",
            $crate::test_utils::logging::format_logs_for_display()
        );
    }};
}

/// Assert that no warning-level events were captured.
#[macro_export]
macro_rules! assert_no_warnings {
    () => {{
        assert!(
            !$crate::test_utils::logging::logs_have_warnings(),
            "expected no warning logs\n{}",
            $crate::test_utils::logging::format_logs_for_display()
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(Level::WARN, "refbase::store", "stale cache")
            .with_field("id", "d1")
            .with_field("reason", "patch failed");
        assert_eq!(entry.level, Level::WARN);
        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.fields[0].0, "id");
    }

    #[test]
    fn test_storage_caps_entries() {
        let mut storage = LogStorage::new(3);
        for i in 0..5 {
            storage.push(LogEntry::new(Level::INFO, "t", &format!("message {i}")));
        }
        assert_eq!(storage.entries().len(), 3);
        assert!(!storage.contains_message("message 0"));
        assert!(storage.contains_message("message 4"));
    }

    #[test]
    fn test_storage_level_queries() {
        let mut storage = LogStorage::new(10);
        storage.push(LogEntry::new(Level::INFO, "t", "fine"));
        storage.push(LogEntry::new(Level::WARN, "t", "wobbly"));
        assert!(storage.has_warnings());
        assert!(!storage.has_errors());
        assert_eq!(storage.filter_by_level(Level::WARN).len(), 1);
    }
}
