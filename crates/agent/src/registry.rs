//! Files this agent currently serves.

use parking_lot::Mutex;

use crate::errors::{AgentError, Result};
use crate::serving::ServingHandle;

/// A file registered with the index and the task serving it.
#[derive(Debug)]
pub struct LocalServedFile {
    pub filename: String,
    pub port: u16,
    handle: ServingHandle,
}

impl LocalServedFile {
    pub fn new(filename: impl Into<String>, handle: ServingHandle) -> Self {
        Self {
            filename: filename.into(),
            port: handle.port(),
            handle,
        }
    }

    /// Stop the accept loop for this file.
    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Served files keyed by filename, in registration order.
#[derive(Debug, Default)]
pub struct ServedFiles {
    files: Mutex<Vec<LocalServedFile>>,
}

impl ServedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.lock().iter().any(|file| file.filename == filename)
    }

    pub fn port_of(&self, filename: &str) -> Option<u16> {
        self.files
            .lock()
            .iter()
            .find(|file| file.filename == filename)
            .map(|file| file.port)
    }

    /// Record a newly served file. At most one entry per filename.
    pub fn insert(&self, file: LocalServedFile) -> std::result::Result<(), LocalServedFile> {
        let mut files = self.files.lock();
        if files.iter().any(|existing| existing.filename == file.filename) {
            return Err(file);
        }
        files.push(file);
        Ok(())
    }

    pub fn remove(&self, filename: &str) -> Result<LocalServedFile> {
        let mut files = self.files.lock();
        let position = files
            .iter()
            .position(|file| file.filename == filename)
            .ok_or_else(|| AgentError::NotServing(filename.to_string()))?;
        Ok(files.remove(position))
    }

    /// Take every entry, leaving the registry empty.
    pub fn drain(&self) -> Vec<LocalServedFile> {
        std::mem::take(&mut *self.files.lock())
    }

    /// `(filename, port)` pairs in registration order.
    pub fn snapshot(&self) -> Vec<(String, u16)> {
        self.files
            .lock()
            .iter()
            .map(|file| (file.filename.clone(), file.port))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}
