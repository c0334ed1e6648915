use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use facture_core::ProgressEvent;
use thiserror::Error;
use tokio::sync::oneshot;

/// Phase label reported while the engine reads characters.
pub const PHASE_RECOGNIZING: &str = "recognizing text";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine failed to start: {0}")]
    Init(String),
    #[error("OCR engine is already recognizing an image")]
    Busy,
    #[error("OCR engine has been terminated")]
    Terminated,
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Recognition(String),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

/// Factory for engine instances. Starting an engine is the expensive part
/// (language data is loaded here), so instances are kept and reused.
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self, language: &str) -> Result<Box<dyn OcrEngine>, OcrError>;
}

/// One live engine instance. Calls block the current thread.
pub trait OcrEngine: Send + Sync {
    /// Recognize `image` and return the raw text, which may be empty.
    /// `progress` may be called any number of times before returning.
    fn recognize(
        &self,
        image: &[u8],
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<String, OcrError>;

    /// Release the engine's resources. Must tolerate repeated calls.
    fn terminate(&self) {}
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// One scripted answer of [`MockBackend`].
pub struct MockResponse {
    progress: Vec<f32>,
    outcome: Result<String, String>,
    gate: Option<oneshot::Receiver<()>>,
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self { progress: Vec::new(), outcome: Ok(text.into()), gate: None }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self { progress: Vec::new(), outcome: Err(message.into()), gate: None }
    }

    /// Fractions reported, in this order, before the outcome.
    pub fn with_progress<const N: usize>(mut self, fractions: [f32; N]) -> Self {
        self.progress = fractions.to_vec();
        self
    }

    /// Hold the recognition open after reporting progress until the returned
    /// sender fires or is dropped.
    pub fn gated(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.gate = Some(rx);
        (self, tx)
    }
}

#[derive(Default)]
struct MockState {
    queue: Mutex<VecDeque<MockResponse>>,
    starts: AtomicUsize,
    recognitions: AtomicUsize,
    terminations: AtomicUsize,
}

/// Scripted backend: answers recognitions from a queue, then falls back to a
/// fixed text. Useful for exercising the session flow without Tesseract.
pub struct MockBackend {
    default_text: String,
    init_failure: Option<String>,
    start_delay: Option<Duration>,
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(text: impl Into<String>) -> Self {
        Self { default_text: text.into(), init_failure: None, start_delay: None, state: Arc::default() }
    }

    /// Block every `start` for `delay`, as loading language data does.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// A backend whose engines never start, as when language data is missing.
    pub fn failing_init(message: impl Into<String>) -> Self {
        Self { init_failure: Some(message.into()), ..Self::new("") }
    }

    pub fn push(&self, response: MockResponse) {
        if let Ok(mut queue) = self.state.queue.lock() {
            queue.push_back(response);
        }
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn recognitions(&self) -> usize {
        self.state.recognitions.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.state.terminations.load(Ordering::SeqCst)
    }
}

impl OcrBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn start(&self, language: &str) -> Result<Box<dyn OcrEngine>, OcrError> {
        if let Some(delay) = self.start_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.init_failure {
            return Err(OcrError::Init(format!("{message} ({language})")));
        }
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            default_text: self.default_text.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockEngine {
    default_text: String,
    state: Arc<MockState>,
}

impl OcrEngine for MockEngine {
    fn recognize(
        &self,
        _image: &[u8],
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<String, OcrError> {
        self.state.recognitions.fetch_add(1, Ordering::SeqCst);
        let scripted = self.state.queue.lock().ok().and_then(|mut q| q.pop_front());
        let response = scripted.unwrap_or_else(|| MockResponse::text(self.default_text.clone()));

        for fraction in &response.progress {
            progress(ProgressEvent::new(PHASE_RECOGNIZING, *fraction));
        }
        if let Some(gate) = response.gate {
            let _ = gate.blocking_recv();
        }
        response.outcome.map_err(OcrError::Recognition)
    }

    fn terminate(&self) {
        self.state.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use facture_core::{PreprocessOptions, ProgressEvent};
    use leptess::LepTess;

    use super::{OcrBackend, OcrEngine, OcrError, PHASE_RECOGNIZING};
    use crate::preprocess::prepare_scan;

    pub struct TesseractBackend {
        data_path: Option<String>,
        preprocess: PreprocessOptions,
    }

    impl TesseractBackend {
        pub fn new(data_path: Option<String>, preprocess: PreprocessOptions) -> Self {
            Self { data_path, preprocess }
        }
    }

    impl OcrBackend for TesseractBackend {
        fn name(&self) -> &str {
            "tesseract"
        }

        fn start(&self, language: &str) -> Result<Box<dyn OcrEngine>, OcrError> {
            let lt = LepTess::new(self.data_path.as_deref(), language)
                .map_err(|e| OcrError::Init(e.to_string()))?;
            Ok(Box::new(TesseractEngine {
                api: Mutex::new(Some(lt)),
                terminated: AtomicBool::new(false),
                preprocess: self.preprocess.clone(),
            }))
        }
    }

    /// Keeps one Tesseract API instance alive for every recognition on the handle.
    struct TesseractEngine {
        api: Mutex<Option<LepTess>>,
        terminated: AtomicBool,
        preprocess: PreprocessOptions,
    }

    impl OcrEngine for TesseractEngine {
        fn recognize(
            &self,
            image: &[u8],
            progress: &mut dyn FnMut(ProgressEvent),
        ) -> Result<String, OcrError> {
            progress(ProgressEvent::new("preprocessing image", 0.0));
            let png = prepare_scan(image, &self.preprocess)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;

            let mut api = self
                .api
                .lock()
                .map_err(|_| OcrError::Recognition("engine lock poisoned".into()))?;
            let lt = api.as_mut().ok_or(OcrError::Terminated)?;

            progress(ProgressEvent::new(PHASE_RECOGNIZING, 0.2));
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            progress(ProgressEvent::new(PHASE_RECOGNIZING, 0.5));
            let text = lt.get_utf8_text().map_err(|e| OcrError::Recognition(e.to_string()));
            progress(ProgressEvent::new(PHASE_RECOGNIZING, 1.0));

            // A terminate that arrived mid-run could not take the lock.
            if self.terminated.load(Ordering::SeqCst) {
                api.take();
            }
            text
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
            if let Ok(mut api) = self.api.try_lock() {
                api.take();
            }
        }
    }
}
