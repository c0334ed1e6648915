use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use facture_core::{InputFile, ProgressEvent};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::engine::{OcrBackend, OcrEngine, OcrError};

/// A live engine instance. Only [`EngineAdapter`] creates or replaces handles;
/// everyone else holds them by reference.
pub struct EngineHandle {
    id: u64,
    language: String,
    engine: Box<dyn OcrEngine>,
    busy: AtomicBool,
    terminated: AtomicBool,
}

impl EngineHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Idempotent: the engine sees at most one terminate call.
    fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.engine.terminate();
            debug!(handle = self.id, "OCR engine terminated");
        }
    }

    fn acquire(self: &Arc<Self>) -> Result<BusyGuard, OcrError> {
        if self.is_terminated() {
            return Err(OcrError::Terminated);
        }
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| OcrError::Busy)?;
        Ok(BusyGuard(Arc::clone(self)))
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Marks its handle busy for as long as it lives.
struct BusyGuard(Arc<EngineHandle>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Owns the single engine handle and hides engine start-up cost behind a
/// uniform recognize-with-progress call.
pub struct EngineAdapter {
    backend: Arc<dyn OcrBackend>,
    live: Mutex<Option<Arc<EngineHandle>>>,
    next_id: AtomicU64,
}

impl EngineAdapter {
    pub fn new(backend: Arc<dyn OcrBackend>) -> Self {
        Self { backend, live: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    /// Return the live handle for `language`, starting an engine if there is
    /// none. A live handle for another language is terminated and replaced.
    pub async fn initialize(&self, language: &str) -> Result<Arc<EngineHandle>, OcrError> {
        let mut live = self.live.lock().await;
        if let Some(handle) = live.as_ref() {
            if !handle.is_terminated() && handle.language == language {
                return Ok(Arc::clone(handle));
            }
            handle.terminate();
            *live = None;
        }

        // The handle is built on the blocking thread: if this future is dropped
        // mid-start, the finished task drops the handle and terminates the engine.
        let backend = Arc::clone(&self.backend);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let lang = language.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            let engine = backend.start(&lang)?;
            Ok::<_, OcrError>(Arc::new(EngineHandle {
                id,
                language: lang,
                engine,
                busy: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
            }))
        })
        .await
        .map_err(|e| OcrError::Init(format!("engine start aborted: {e}")))??;

        info!(handle = handle.id, backend = self.backend.name(), language, "OCR engine started");
        *live = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Run one recognition on `handle`, forwarding progress to `on_progress`
    /// in arrival order with fractions clamped to never decrease.
    ///
    /// A second call on a handle that is still recognizing is rejected with
    /// [`OcrError::Busy`]. Empty text is a successful result.
    pub async fn recognize<F>(
        &self,
        handle: &Arc<EngineHandle>,
        image: Arc<InputFile>,
        mut on_progress: F,
    ) -> Result<String, OcrError>
    where
        F: FnMut(ProgressEvent),
    {
        let guard = handle.acquire()?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::task::spawn_blocking(move || {
            let guard = guard;
            let mut high = 0.0f32;
            let mut report = |event: ProgressEvent| {
                high = high.max(event.fraction);
                let _ = tx.send(ProgressEvent { fraction: high, ..event });
            };
            let result = guard.0.engine.recognize(&image.bytes, &mut report);
            (result, guard.0.is_terminated())
        });

        while let Some(event) = rx.recv().await {
            on_progress(event);
        }

        let (result, terminated) = task
            .await
            .map_err(|e| OcrError::Recognition(format!("recognition task failed: {e}")))?;
        if terminated {
            return Err(OcrError::Terminated);
        }
        result
    }

    /// Release `handle`. Safe to call repeatedly and on stale handles.
    pub async fn terminate(&self, handle: &EngineHandle) {
        handle.terminate();
        let mut live = self.live.lock().await;
        if live.as_ref().is_some_and(|h| h.id == handle.id) {
            *live = None;
        }
    }

    /// Terminate the live handle, if any. The next `initialize` starts afresh.
    pub async fn reset(&self) {
        if let Some(handle) = self.live.lock().await.take() {
            handle.terminate();
        }
    }

    pub async fn live_handle(&self) -> Option<Arc<EngineHandle>> {
        self.live.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockBackend, MockResponse};
    use std::time::Duration;

    fn image() -> Arc<InputFile> {
        Arc::new(InputFile::new("facture.png", vec![0x89, b'P', b'N', b'G']))
    }

    fn adapter_with(backend: &Arc<MockBackend>) -> EngineAdapter {
        EngineAdapter::new(Arc::clone(backend) as Arc<dyn OcrBackend>)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let backend = Arc::new(MockBackend::new("x"));
        let adapter = adapter_with(&backend);

        let a = adapter.initialize("fra").await.unwrap();
        let b = adapter.initialize("fra").await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(backend.starts(), 1);
    }

    #[tokio::test]
    async fn initialize_with_other_language_replaces_handle() {
        let backend = Arc::new(MockBackend::new("x"));
        let adapter = adapter_with(&backend);

        let fra = adapter.initialize("fra").await.unwrap();
        let eng = adapter.initialize("eng").await.unwrap();
        assert_ne!(fra.id(), eng.id());
        assert!(fra.is_terminated());
        assert_eq!(eng.language(), "eng");
        assert_eq!(backend.terminations(), 1);
    }

    #[tokio::test]
    async fn initialize_failure_is_reported() {
        let backend = Arc::new(MockBackend::failing_init("no language data"));
        let adapter = adapter_with(&backend);
        let err = adapter.initialize("fra").await.err().unwrap();
        assert!(matches!(err, OcrError::Init(_)));
        assert!(adapter.live_handle().await.is_none());
    }

    #[tokio::test]
    async fn recognize_forwards_progress_and_returns_text() {
        let backend = Arc::new(MockBackend::new("x"));
        backend.push(MockResponse::text("Total: 42,00").with_progress([0.1, 0.4, 0.9]));
        let adapter = adapter_with(&backend);
        let handle = adapter.initialize("fra").await.unwrap();

        let mut seen = Vec::new();
        let text = adapter
            .recognize(&handle, image(), |e| seen.push(e.fraction))
            .await
            .unwrap();
        assert_eq!(text, "Total: 42,00");
        assert_eq!(seen, vec![0.1, 0.4, 0.9]);
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn recognize_clamps_out_of_order_progress() {
        let backend = Arc::new(MockBackend::new("x"));
        backend.push(MockResponse::text("ok").with_progress([0.5, 0.2, 0.7, 0.6]));
        let adapter = adapter_with(&backend);
        let handle = adapter.initialize("fra").await.unwrap();

        let mut seen = Vec::new();
        adapter.recognize(&handle, image(), |e| seen.push(e.fraction)).await.unwrap();
        assert_eq!(seen, vec![0.5, 0.5, 0.7, 0.7]);
    }

    #[tokio::test]
    async fn empty_text_is_not_an_error() {
        let backend = Arc::new(MockBackend::new(""));
        let adapter = adapter_with(&backend);
        let handle = adapter.initialize("fra").await.unwrap();
        assert_eq!(adapter.recognize(&handle, image(), |_| {}).await.unwrap(), "");
    }

    #[tokio::test]
    async fn engine_fault_surfaces_as_recognition_error() {
        let backend = Arc::new(MockBackend::new("x"));
        backend.push(MockResponse::fault("tesseract crashed"));
        let adapter = adapter_with(&backend);
        let handle = adapter.initialize("fra").await.unwrap();
        let err = adapter.recognize(&handle, image(), |_| {}).await.unwrap_err();
        assert!(matches!(err, OcrError::Recognition(_)));
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn second_recognition_on_same_handle_is_busy() {
        let backend = Arc::new(MockBackend::new("x"));
        let (response, release) = MockResponse::text("first").with_progress([0.3]).gated();
        backend.push(response);
        let adapter = Arc::new(adapter_with(&backend));
        let handle = adapter.initialize("fra").await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let first = {
            let adapter = Arc::clone(&adapter);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                let mut started = Some(started_tx);
                adapter
                    .recognize(&handle, image(), move |_| {
                        if let Some(tx) = started.take() {
                            let _ = tx.send(());
                        }
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let err = adapter.recognize(&handle, image(), |_| {}).await.unwrap_err();
        assert!(matches!(err, OcrError::Busy));

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert!(!handle.is_busy());
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_blocks_reuse() {
        let backend = Arc::new(MockBackend::new("x"));
        let adapter = adapter_with(&backend);
        let handle = adapter.initialize("fra").await.unwrap();

        adapter.terminate(&handle).await;
        adapter.terminate(&handle).await;
        assert_eq!(backend.terminations(), 1);
        assert!(adapter.live_handle().await.is_none());

        let err = adapter.recognize(&handle, image(), |_| {}).await.unwrap_err();
        assert!(matches!(err, OcrError::Terminated));
    }

    #[tokio::test]
    async fn reset_abandons_in_flight_recognition() {
        let backend = Arc::new(MockBackend::new("x"));
        let (response, release) = MockResponse::text("stale").with_progress([0.5]).gated();
        backend.push(response);
        let adapter = Arc::new(adapter_with(&backend));
        let handle = adapter.initialize("fra").await.unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let in_flight = {
            let adapter = Arc::clone(&adapter);
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                let mut started = Some(started_tx);
                adapter
                    .recognize(&handle, image(), move |_| {
                        if let Some(tx) = started.take() {
                            let _ = tx.send(());
                        }
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        adapter.reset().await;
        let fresh = adapter.initialize("fra").await.unwrap();
        assert_ne!(fresh.id(), handle.id());

        release.send(()).unwrap();
        assert!(matches!(in_flight.await.unwrap(), Err(OcrError::Terminated)));
    }

    #[tokio::test]
    async fn engine_started_for_a_dropped_caller_is_terminated() {
        let backend = Arc::new(MockBackend::new("x").with_start_delay(Duration::from_millis(200)));
        let adapter = adapter_with(&backend);

        let abandoned = tokio::time::timeout(Duration::from_millis(20), adapter.initialize("fra")).await;
        assert!(abandoned.is_err());
        assert!(adapter.live_handle().await.is_none());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.starts(), 1);
        assert_eq!(backend.terminations(), 1);
    }

    #[tokio::test]
    async fn dropping_adapter_terminates_engine() {
        let backend = Arc::new(MockBackend::new("x"));
        {
            let adapter = adapter_with(&backend);
            adapter.initialize("fra").await.unwrap();
        }
        assert_eq!(backend.terminations(), 1);
    }
}
