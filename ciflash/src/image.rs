//! Firmware image loading.
//!
//! The CI-03T image is pushed as an opaque blob; nothing inside it is parsed.

use crate::error::{Error, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// A firmware image held fully in memory.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    path: PathBuf,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load a firmware file.
    ///
    /// Fails with [`Error::FileNotFound`] if `path` is not an existing
    /// regular file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let data = fs::read(path)?;
        debug!("Read {} bytes from {}", data.len(), path.display());

        Ok(Self::from_bytes(path, data))
    }

    /// Build an image from bytes already in memory.
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display, falling back to the full path.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(
                || self.path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            )
    }

    /// Size in KiB.
    #[allow(clippy::cast_precision_loss)]
    pub fn size_kib(&self) -> f64 {
        self.data.len() as f64 / 1024.0
    }
}
