use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::input::InputFile;

/// Identity of one submission. Every in-flight engine call is tagged with it so
/// that results belonging to a superseded session can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Initializing,
    Recognizing,
    Succeeded,
    Failed,
}

impl SessionStatus {
    /// Succeeded and Failed end a run; a new submission may still follow.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Succeeded | SessionStatus::Failed)
    }

    /// Whether an engine call may be outstanding for the session.
    pub fn is_busy(self) -> bool {
        matches!(self, SessionStatus::Initializing | SessionStatus::Recognizing)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Recognizing => write!(f, "recognizing"),
            SessionStatus::Succeeded => write!(f, "succeeded"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SessionStatus::Idle),
            "initializing" => Ok(SessionStatus::Initializing),
            "recognizing" => Ok(SessionStatus::Recognizing),
            "succeeded" => Ok(SessionStatus::Succeeded),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("Unknown session status: '{other}'")),
        }
    }
}

/// Fractional completion reported by the engine while it recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: String,
    /// Completion in `0.0..=1.0`.
    pub fraction: f32,
}

impl ProgressEvent {
    pub fn new(phase: impl Into<String>, fraction: f32) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        Self { phase: phase.into(), fraction }
    }

    pub fn percent(&self) -> f32 {
        self.fraction * 100.0
    }
}

/// Snapshot of the single active session, as published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Option<SessionId>,
    pub file_name: Option<String>,
    /// The submitted image, owned by the session until it is replaced.
    #[serde(skip)]
    pub input: Option<Arc<InputFile>>,
    pub status: SessionStatus,
    /// Percentage in `0.0..=100.0`.
    pub progress: f32,
    pub status_message: String,
    pub extracted_text: Option<String>,
    pub error: Option<SessionError>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn idle() -> Self {
        Self {
            id: None,
            file_name: None,
            input: None,
            status: SessionStatus::Idle,
            progress: 0.0,
            status_message: String::new(),
            extracted_text: None,
            error: None,
            submitted_at: None,
        }
    }

    /// A fresh session for `input`, already in the Initializing state.
    pub fn start(id: SessionId, input: Arc<InputFile>, status_message: &str) -> Self {
        Self {
            id: Some(id),
            file_name: Some(input.name.clone()),
            input: Some(input),
            status: SessionStatus::Initializing,
            progress: 0.0,
            status_message: status_message.to_string(),
            extracted_text: None,
            error: None,
            submitted_at: Some(Utc::now()),
        }
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.id == Some(id)
    }

    /// The text an export should render: present only after success.
    pub fn exportable_text(&self) -> Option<&str> {
        match self.status {
            SessionStatus::Succeeded => self.extracted_text.as_deref(),
            _ => None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrip() {
        for status in [
            SessionStatus::Idle,
            SessionStatus::Initializing,
            SessionStatus::Recognizing,
            SessionStatus::Succeeded,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert!(SessionStatus::from_str("done").is_err());
    }

    #[test]
    fn terminal_and_busy_are_disjoint() {
        assert!(SessionStatus::Succeeded.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(SessionStatus::Recognizing.is_busy());
        assert!(!SessionStatus::Failed.is_busy());
    }

    #[test]
    fn progress_event_clamps_fraction() {
        assert_eq!(ProgressEvent::new("recognizing text", 1.7).fraction, 1.0);
        assert_eq!(ProgressEvent::new("recognizing text", -0.2).fraction, 0.0);
        assert_eq!(ProgressEvent::new("recognizing text", f32::NAN).fraction, 0.0);
        assert_eq!(ProgressEvent::new("recognizing text", 0.25).percent(), 25.0);
    }

    #[test]
    fn started_session_is_initializing_with_zero_progress() {
        let id = SessionId::new();
        let input = Arc::new(InputFile::new("scan.png", vec![1, 2, 3]));
        let s = Session::start(id, input, "Initializing OCR engine");
        assert_eq!(s.status, SessionStatus::Initializing);
        assert_eq!(s.progress, 0.0);
        assert_eq!(s.file_name.as_deref(), Some("scan.png"));
        assert!(s.is_current(id));
        assert!(!s.is_current(SessionId::new()));
        assert!(s.exportable_text().is_none());
    }

    #[test]
    fn snapshot_serializes_without_image_bytes() {
        let input = Arc::new(InputFile::new("scan.png", vec![9; 16]));
        let s = Session::start(SessionId::new(), input, "Initializing OCR engine");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "initializing");
        assert!(json.get("input").is_none());
    }
}
