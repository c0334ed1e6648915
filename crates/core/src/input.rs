use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Upload ceiling shared with the upload widget (10 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("File is empty")]
    Empty,
    #[error("File is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("Unsupported file type: '{0}'")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

impl ImageFormat {
    /// Map a file extension (without the dot, any case) to a raster format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Tiff => write!(f, "tiff"),
            ImageFormat::Bmp => write!(f, "bmp"),
        }
    }
}

/// An uploaded image, identified by its original file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self { name, bytes })
    }

    pub fn extension(&self) -> &str {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }

    pub fn format(&self) -> Option<ImageFormat> {
        ImageFormat::from_extension(self.extension())
    }

    /// Cheap caller-side checks only: size and declared type. The bytes are
    /// never decoded here.
    pub fn validate(&self, max_bytes: usize) -> Result<ImageFormat, InputError> {
        if self.bytes.is_empty() {
            return Err(InputError::Empty);
        }
        if self.bytes.len() > max_bytes {
            return Err(InputError::TooLarge { size: self.bytes.len(), limit: max_bytes });
        }
        self.format()
            .ok_or_else(|| InputError::UnsupportedFormat(self.extension().to_string()))
    }
}
