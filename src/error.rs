// src/error.rs

use thiserror::Error;

// --- Error Kinds ---

/// Coarse classification callers branch on instead of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Base kind: integration disabled or unrecoverable.
    Workday,
    /// SSO/login failure, or an unclassified automation failure surfaced non-interactively.
    Authentication,
    /// Page structure did not match what the scraper expects.
    Navigation,
}

// --- Browser Driver Errors ---

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to start browser session: {0}")]
    Launch(String),

    #[error("Browser command failed: {0}")]
    Command(String),

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

impl DriverError {
    pub fn timeout(what: impl Into<String>, timeout: std::time::Duration) -> Self {
        DriverError::Timeout {
            what: what.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

// --- Workday Errors ---

#[derive(Error, Debug)]
pub enum WorkdayError {
    #[error("Workday integration is disabled")]
    Disabled,

    #[error("{0}")]
    General(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Navigation(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Driver(#[from] DriverError),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
}

impl WorkdayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkdayError::Authentication(_) => ErrorKind::Authentication,
            WorkdayError::Navigation(_) => ErrorKind::Navigation,
            _ => ErrorKind::Workday,
        }
    }
}

pub type WorkdayResult<T> = Result<T, WorkdayError>;

// Helper to attach a context string to I/O failures
pub(crate) fn io_context<E: Into<std::io::Error>, S: Into<String>>(
    source: E,
    context: S,
) -> WorkdayError {
    WorkdayError::Io {
        source: source.into(),
        context: context.into(),
    }
}

pub(crate) fn driver_io_context<E: Into<std::io::Error>, S: Into<String>>(
    source: E,
    context: S,
) -> DriverError {
    DriverError::Io {
        source: source.into(),
        context: context.into(),
    }
}
