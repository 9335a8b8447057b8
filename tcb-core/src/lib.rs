//! Thick Client Bridge core
//!
//! Tags the traffic of one target application inside an interception proxy.
//! Host/port/MIME allow-lists decide which intercepted messages belong to the
//! application; matching requests get an `X-TCB: 1` marker header and every
//! match is annotated and reported to an event recorder. A PAC generator turns
//! the same host rule into a proxy auto-config script.

/// Configuration types and utilities
pub mod config;

/// Error types for tagging operations
pub mod error;

/// Compiled allow-lists
pub mod filter;

/// Runtime rule store (atomically swapped snapshots)
pub mod policy;

/// Intercepted message boundary and HTTP head parsing
pub mod message;

/// Effective MIME resolution and sniffing
pub mod mime;

pub mod classifier;
pub mod pac;
pub mod recorder;

pub use classifier::{classify, ClassificationResult, Direction, TrafficClassifier, TrafficEvent};
pub use config::FilterSettings;
pub use error::{ClassificationFailure, CompileError, PacWriteFailure, PortParseError, TcbError};
pub use filter::{compile_host, compile_mime, parse_ports, FilterRuleSet};
pub use message::{HttpExchange, HttpService, InterceptedMessage};
pub use mime::effective_mime;
pub use pac::{build_selective_pac, PacSpec};
pub use policy::{ApplyOutcome, RuleStore};
pub use recorder::{
    ChannelRecorder, EventRecorder, EventRow, FanoutRecorder, MemoryRecorder, TracingRecorder,
};

/// Result type alias for tagging operations
pub type Result<T> = std::result::Result<T, TcbError>;
