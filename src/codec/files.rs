use crate::error::CodecError;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// One exchange document on disk
struct ExchangeFile {
    role: String,
    file: NamedTempFile,
}

/// All exchange files belonging to one engine call
///
/// Files are deleted together when the set is released or dropped, so every
/// exit path of a call cleans up, including early returns through `?`.
#[derive(Default)]
pub struct ExchangeFileSet {
    files: Vec<ExchangeFile>,
}

impl ExchangeFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `document` whole into a fresh temp file and return its path.
    pub fn write_json<T: Serialize + ?Sized>(
        &mut self,
        role: &str,
        document: &T,
    ) -> Result<PathBuf, CodecError> {
        let mut file = Self::create(role)?;

        serde_json::to_writer(file.as_file_mut(), document)?;
        file.flush().map_err(|e| CodecError::WriteFile {
            role: role.to_string(),
            source: e,
        })?;

        Ok(self.track(role, file))
    }

    /// Create an empty file for the engine to write into (`--output`).
    pub fn reserve_output(&mut self, role: &str) -> Result<PathBuf, CodecError> {
        let file = Self::create(role)?;
        Ok(self.track(role, file))
    }

    /// Path of the file registered under `role`
    pub fn path(&self, role: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|f| f.role == role)
            .map(|f| f.file.path())
    }

    /// Read back a file the engine wrote; empty string when it wrote nothing.
    pub fn read_to_string(&self, role: &str) -> std::io::Result<String> {
        match self.path(role) {
            Some(path) => std::fs::read_to_string(path),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no exchange file registered for '{}'", role),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Close and delete every file in the set.
    pub fn release(mut self) {
        for exchange in self.files.drain(..) {
            let path = exchange.file.path().to_path_buf();
            if let Err(e) = exchange.file.close() {
                warn!(
                    "Failed to delete exchange file '{}' ({}): {}",
                    exchange.role,
                    path.display(),
                    e
                );
            }
        }
    }

    fn create(role: &str) -> Result<NamedTempFile, CodecError> {
        tempfile::Builder::new()
            .prefix(&format!("{}_", role))
            .suffix(".json")
            .tempfile()
            .map_err(|e| CodecError::WriteFile {
                role: role.to_string(),
                source: e,
            })
    }

    fn track(&mut self, role: &str, file: NamedTempFile) -> PathBuf {
        let path = file.path().to_path_buf();
        debug!("Exchange file '{}' at {}", role, path.display());
        self.files.push(ExchangeFile {
            role: role.to_string(),
            file,
        });
        path
    }
}
