//! Error types for traffic tagging operations

use thiserror::Error;

/// Which allow-list field a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternField {
    Host,
    Mime,
}

impl std::fmt::Display for PatternField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternField::Host => write!(f, "host"),
            PatternField::Mime => write!(f, "MIME"),
        }
    }
}

/// A host or MIME allow pattern failed to compile.
///
/// The rule store keeps the last-known-good pattern when this happens, so the
/// error is informational for the user-visible log.
#[derive(Debug, Clone, Error)]
#[error("Bad {field} regex: {pattern:?}: {message}")]
pub struct CompileError {
    pub field: PatternField,
    pub pattern: String,
    pub message: String,
}

/// A single port token could not be parsed. Never surfaced to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid port token: {token:?}")]
pub struct PortParseError {
    pub token: String,
}

/// Unexpected failure while inspecting an intercepted message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassificationFailure {
    #[error("message has no service information")]
    MissingService,

    #[error("message has no response")]
    MissingResponse,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Writing a generated PAC document to storage failed
#[derive(Debug, Error)]
#[error("PAC generation failed: {0}")]
pub struct PacWriteFailure(#[from] pub std::io::Error);

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum TcbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid PAC parameters: {0}")]
    InvalidPacSpec(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Classification(#[from] ClassificationFailure),

    #[error(transparent)]
    PacWrite(#[from] PacWriteFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
