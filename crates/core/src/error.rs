use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of everything that can end a session in Failed, plus the
/// export-side failure that never touches session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EngineInit,
    EngineBusy,
    Recognition,
    NoTextExtracted,
    InvalidInput,
    Timeout,
    Render,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::EngineInit => write!(f, "engine_init"),
            ErrorKind::EngineBusy => write!(f, "engine_busy"),
            ErrorKind::Recognition => write!(f, "recognition"),
            ErrorKind::NoTextExtracted => write!(f, "no_text_extracted"),
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Render => write!(f, "render"),
        }
    }
}

/// The `error` record stored on a Failed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Whether submitting again (possibly with another file) can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, ErrorKind::EngineBusy)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SessionError {}
