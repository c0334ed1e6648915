pub mod config;
pub mod error;
pub mod input;
pub mod render;
pub mod session;

pub use config::{ConfigError, ExportOptions, FactureConfig, NormalizeMode, PreprocessOptions};
pub use error::{ErrorKind, SessionError};
pub use input::{ImageFormat, InputError, InputFile, DEFAULT_MAX_INPUT_BYTES};
pub use render::{ExportRenderer, RenderError};
pub use session::{ProgressEvent, Session, SessionId, SessionStatus};
