use std::sync::Arc;

use facture_core::{
    ErrorKind, ExportRenderer, FactureConfig, InputError, InputFile, ProgressEvent, RenderError,
    Session, SessionError, SessionId, SessionStatus,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::adapter::EngineAdapter;
use crate::engine::{OcrBackend, OcrError};
use crate::normalize::normalize;

pub const MSG_INITIALIZING: &str = "Initializing OCR engine";
pub const MSG_RECOGNIZING: &str = "Recognizing text";
pub const MSG_DONE: &str = "Done";
pub const MSG_FAILED: &str = "Failed";

/// Transitions buffered per subscriber before a slow one starts lagging.
const TRANSITION_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum EditError {
    #[error("There is no recognized text to edit (session is {0})")]
    NotEditable(SessionStatus),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Nothing to export (session is {0})")]
    NothingToExport(SessionStatus),
    #[error("Export failed: {0}")]
    Render(#[from] RenderError),
    #[error("Export task failed: {0}")]
    Task(String),
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::NothingToExport(_) => ErrorKind::InvalidInput,
            ExportError::Render(_) | ExportError::Task(_) => ErrorKind::Render,
        }
    }
}

/// Drives one invoice scan through upload → recognition → correction → export.
///
/// The current [`Session`] lives in a watch channel and every transition is
/// also broadcast, in order, to [`subscribe`](Self::subscribe)d receivers. Every write
/// checks that the session it belongs to is still the current one so that a
/// superseded recognition can never overwrite a newer submission.
pub struct SessionController {
    adapter: EngineAdapter,
    config: FactureConfig,
    state: watch::Sender<Session>,
    transitions: broadcast::Sender<Session>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn OcrBackend>, config: FactureConfig) -> Self {
        let (state, _) = watch::channel(Session::idle());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self { adapter: EngineAdapter::new(backend), config, state, transitions }
    }

    pub fn config(&self) -> &FactureConfig {
        &self.config
    }

    pub fn current_state(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Every state transition from now on, in the order they happened.
    pub fn subscribe(&self) -> broadcast::Receiver<Session> {
        self.transitions.subscribe()
    }

    /// The latest state only; intermediate transitions may be skipped.
    pub fn watch_state(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Start a new session for `file` and run it until it succeeds, fails, or
    /// is superseded by a later submission.
    ///
    /// A file rejected by validation leaves the current session untouched.
    /// Engine and recognition failures are recorded on the session instead of
    /// being returned.
    pub async fn submit(&self, file: InputFile) -> Result<SessionId, InputError> {
        if let Err(e) = file.validate(self.config.max_input_bytes) {
            warn!(file = %file.name, "Upload rejected: {e}");
            return Err(e);
        }

        let id = SessionId::new();
        let input = Arc::new(file);
        let mut superseded = false;
        self.update(|s| {
            superseded = s.status.is_busy();
            *s = Session::start(id, Arc::clone(&input), MSG_INITIALIZING);
            true
        });
        info!(session = %id, file = %input.name, bytes = input.bytes.len(), "Invoice submitted");

        if superseded {
            debug!(session = %id, "Abandoning recognition of the previous session");
            self.adapter.reset().await;
        }

        tokio::select! {
            _ = self.run(id, input) => {}
            _ = superseded_by_other(self.state.subscribe(), id) => {
                debug!(session = %id, "Session superseded before completion");
            }
        }
        Ok(id)
    }

    /// Replace the recognized text with the user's correction.
    pub fn edit_text(&self, text: impl Into<String>) -> Result<(), EditError> {
        let text = text.into();
        let mut status = SessionStatus::Idle;
        self.update(|s| {
            status = s.status;
            if s.status != SessionStatus::Succeeded {
                return false;
            }
            s.extracted_text = Some(text);
            true
        });
        match status {
            SessionStatus::Succeeded => Ok(()),
            other => Err(EditError::NotEditable(other)),
        }
    }

    /// Render the current (possibly edited) text. Failures are returned to the
    /// caller and never change the session.
    pub async fn export(&self, renderer: Arc<dyn ExportRenderer>) -> Result<Vec<u8>, ExportError> {
        let (id, text) = {
            let s = self.state.borrow();
            match (s.id, s.exportable_text()) {
                (Some(id), Some(text)) => (id, text.to_string()),
                _ => return Err(ExportError::NothingToExport(s.status)),
            }
        };

        let rendered = tokio::task::spawn_blocking(move || renderer.render(&text))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?;
        match rendered {
            Ok(bytes) => {
                info!(session = %id, bytes = bytes.len(), "Invoice exported");
                Ok(bytes)
            }
            Err(e) => {
                warn!(session = %id, "Export failed: {e}");
                Err(ExportError::Render(e))
            }
        }
    }

    /// Terminate the engine and return to Idle. Any in-flight `submit` returns.
    pub async fn shutdown(&self) {
        self.update(|s| {
            *s = Session::idle();
            true
        });
        self.adapter.reset().await;
        info!("OCR session controller shut down");
    }

    async fn run(&self, id: SessionId, input: Arc<InputFile>) {
        let handle = match self.adapter.initialize(&self.config.language).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(id, SessionError::new(ErrorKind::EngineInit, e.to_string()));
                return;
            }
        };

        let entered = self.update(|s| {
            if !s.is_current(id) {
                return false;
            }
            s.status = SessionStatus::Recognizing;
            s.status_message = MSG_RECOGNIZING.to_string();
            true
        });
        if !entered {
            debug!(session = %id, "Engine ready for a stale session, not recognizing");
            return;
        }

        let recognition = self.adapter.recognize(&handle, input, |event| self.apply_progress(id, event));
        let outcome = match self.config.recognition_timeout() {
            None => recognition.await.map_err(session_error),
            Some(limit) => match tokio::time::timeout(limit, recognition).await {
                Ok(result) => result.map_err(session_error),
                Err(_) => {
                    self.adapter.reset().await;
                    Err(SessionError::new(
                        ErrorKind::Timeout,
                        format!("No result after {}s", limit.as_secs()),
                    ))
                }
            },
        };

        match outcome {
            Ok(raw) => self.complete(id, &raw),
            Err(error) => self.fail(id, error),
        }
    }

    /// Apply `change` to the published state. When it reports a modification
    /// the new state is broadcast while the watch lock is still held, so
    /// subscribers receive transitions in the order they were made.
    fn update(&self, change: impl FnOnce(&mut Session) -> bool) -> bool {
        self.state.send_if_modified(|s| {
            if !change(s) {
                return false;
            }
            let _ = self.transitions.send(s.clone());
            true
        })
    }

    fn apply_progress(&self, id: SessionId, event: ProgressEvent) {
        let applied = self.update(|s| {
            if !s.is_current(id) || s.status != SessionStatus::Recognizing {
                return false;
            }
            let progress = s.progress.max(event.percent().clamp(0.0, 100.0));
            let changed = progress != s.progress || s.status_message != event.phase;
            s.progress = progress;
            s.status_message = event.phase.clone();
            changed
        });
        if applied {
            debug!(session = %id, phase = %event.phase, fraction = event.fraction, "Progress");
        }
    }

    fn complete(&self, id: SessionId, raw: &str) {
        let text = normalize(raw, self.config.normalize_mode);
        if text.is_empty() {
            self.fail(
                id,
                SessionError::new(ErrorKind::NoTextExtracted, "No text could be extracted from the image"),
            );
            return;
        }

        let chars = text.chars().count();
        let applied = self.update(|s| {
            if !s.is_current(id) {
                return false;
            }
            s.status = SessionStatus::Succeeded;
            s.progress = 100.0;
            s.status_message = MSG_DONE.to_string();
            s.extracted_text = Some(text);
            s.error = None;
            true
        });
        if applied {
            info!(session = %id, chars, "Text extracted");
        } else {
            debug!(session = %id, "Dropping result of a superseded session");
        }
    }

    fn fail(&self, id: SessionId, error: SessionError) {
        let message = error.to_string();
        let applied = self.update(|s| {
            if !s.is_current(id) {
                return false;
            }
            s.status = SessionStatus::Failed;
            s.progress = 0.0;
            s.status_message = MSG_FAILED.to_string();
            s.extracted_text = None;
            s.error = Some(error);
            true
        });
        if applied {
            warn!(session = %id, "OCR failed: {message}");
        } else {
            debug!(session = %id, "Dropping failure of a superseded session: {message}");
        }
    }
}

fn session_error(e: OcrError) -> SessionError {
    let kind = match e {
        OcrError::Init(_) | OcrError::NotAvailable => ErrorKind::EngineInit,
        OcrError::Busy => ErrorKind::EngineBusy,
        OcrError::Terminated | OcrError::ImageDecode(_) | OcrError::Recognition(_) => {
            ErrorKind::Recognition
        }
    };
    SessionError::new(kind, e.to_string())
}

/// Resolves once the published session is no longer `id`.
async fn superseded_by_other(mut watcher: watch::Receiver<Session>, id: SessionId) {
    loop {
        if !watcher.borrow_and_update().is_current(id) {
            return;
        }
        if watcher.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
