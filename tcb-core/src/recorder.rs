//! Event recording
//!
//! The classifier reports every labeled message, and every info or warning
//! message, as an [`EventRow`] to an [`EventRecorder`]. What happens to the
//! row (table, channel, log) is up to the recorder.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const ARROW_REQUEST: &str = "→";
pub const ARROW_RESPONSE: &str = "←";
pub const LABELED: &str = "labeled";
pub const PASS: &str = "pass";

/// Kind of row, rendered in the direction column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Request,
    Response,
    Info,
    Warn,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Request => ARROW_REQUEST,
            RowKind::Response => ARROW_RESPONSE,
            RowKind::Info => "info",
            RowKind::Warn => "warn",
        }
    }
}

/// One row of the event log: time, direction, host, port, method/code, label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub time: String,
    pub kind: RowKind,
    pub host: String,
    pub port: String,
    pub method_or_code: String,
    pub label: String,
}

/// `HH:MM:SS` in local time
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl EventRow {
    pub fn labeled(kind: RowKind, host: &str, port: u16, method_or_code: impl Into<String>) -> Self {
        Self {
            time: timestamp(),
            kind,
            host: host.to_string(),
            port: port.to_string(),
            method_or_code: method_or_code.into(),
            label: LABELED.to_string(),
        }
    }

    /// Row for a message that did not match; never produced by the classifier
    pub fn pass(kind: RowKind, host: &str, port: u16) -> Self {
        Self {
            time: timestamp(),
            kind,
            host: host.to_string(),
            port: port.to_string(),
            method_or_code: "-".to_string(),
            label: PASS.to_string(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::note(RowKind::Info, message.into())
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::note(RowKind::Warn, message.into())
    }

    fn note(kind: RowKind, message: String) -> Self {
        Self {
            time: timestamp(),
            kind,
            host: "-".to_string(),
            port: "-".to_string(),
            method_or_code: "-".to_string(),
            label: message,
        }
    }

    pub fn direction(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Tab-separated rendering, in table column order
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.time,
            self.direction(),
            self.host,
            self.port,
            self.method_or_code,
            self.label
        )
    }
}

/// Sink for classification outcomes.
///
/// Called from proxy I/O threads; implementations must not block for long.
pub trait EventRecorder: Send + Sync {
    fn record(&self, row: EventRow);
}

/// Keeps every row in memory, in arrival order
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    rows: Mutex<Vec<EventRow>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<EventRow> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every row recorded so far
    pub fn drain(&self) -> Vec<EventRow> {
        match self.rows.lock() {
            Ok(mut rows) => std::mem::take(&mut *rows),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn clear(&self) {
        match self.rows.lock() {
            Ok(mut rows) => rows.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, row: EventRow) {
        match self.rows.lock() {
            Ok(mut rows) => rows.push(row),
            Err(poisoned) => poisoned.into_inner().push(row),
        }
    }
}

/// Forwards rows to a bounded channel. Rows are dropped when the channel is
/// full or closed.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    sender: mpsc::Sender<EventRow>,
}

impl ChannelRecorder {
    pub fn new(sender: mpsc::Sender<EventRow>) -> Self {
        Self { sender }
    }

    /// Create a recorder and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventRow>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl EventRecorder for ChannelRecorder {
    fn record(&self, row: EventRow) {
        if let Err(e) = self.sender.try_send(row) {
            tracing::warn!("Dropping event row: {}", e);
        }
    }
}

/// Emits rows as structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, row: EventRow) {
        match row.kind {
            RowKind::Warn => tracing::warn!(time = %row.time, "{}", row.label),
            RowKind::Info => tracing::info!(time = %row.time, "{}", row.label),
            RowKind::Request | RowKind::Response => tracing::info!(
                time = %row.time,
                direction = row.direction(),
                host = %row.host,
                port = %row.port,
                method_or_code = %row.method_or_code,
                "{}",
                row.label
            ),
        }
    }
}

/// Sends every row to each inner recorder
#[derive(Default)]
pub struct FanoutRecorder {
    recorders: Vec<Arc<dyn EventRecorder>>,
}

impl FanoutRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorders.push(recorder);
        self
    }
}

impl EventRecorder for FanoutRecorder {
    fn record(&self, row: EventRow) {
        if let Some((last, rest)) = self.recorders.split_last() {
            for recorder in rest {
                recorder.record(row.clone());
            }
            last.record(row);
        }
    }
}
