pub mod adapter;
pub mod controller;
pub mod engine;
pub mod normalize;
pub mod preprocess;

pub use adapter::{EngineAdapter, EngineHandle};
pub use controller::{EditError, ExportError, SessionController};
pub use engine::{MockBackend, MockResponse, OcrBackend, OcrEngine, OcrError};
pub use normalize::normalize;
pub use preprocess::{prepare_scan, PreprocessError};

#[cfg(feature = "tesseract")]
pub use engine::tesseract_backend::TesseractBackend;
