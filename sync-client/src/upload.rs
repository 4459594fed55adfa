//! File uploads for media messages.

use async_trait::async_trait;
use convo_sync_types::{FileLocal, FileUpload, RemoteId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::transport::TransportError;

/// Uploads device files and returns the server resource.
#[async_trait]
pub trait FileUploader: Send + Sync + 'static {
    /// Upload `file`.
    async fn upload(&self, file: &FileLocal) -> Result<FileUpload, TransportError>;
}

/// Mock uploader for testing.
#[derive(Debug, Default)]
pub struct MockUploader {
    inner: Arc<Mutex<MockUploaderInner>>,
}

#[derive(Debug, Default)]
struct MockUploaderInner {
    uploads: Vec<FileLocal>,
    failures: VecDeque<TransportError>,
}

impl MockUploader {
    /// Create a new mock uploader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next upload() to fail with the given error.
    pub fn fail_next_upload(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.push_back(error);
    }

    /// Files uploaded so far (failed attempts included).
    pub fn uploads(&self) -> Vec<FileLocal> {
        let inner = self.inner.lock().unwrap();
        inner.uploads.clone()
    }
}

impl Clone for MockUploader {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl FileUploader for MockUploader {
    async fn upload(&self, file: &FileLocal) -> Result<FileUpload, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.uploads.push(file.clone());

        if let Some(error) = inner.failures.pop_front() {
            return Err(error);
        }

        let id = RemoteId::random();
        Ok(FileUpload {
            id,
            url: format!("https://files.invalid/{}", id),
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            thumbnail_url: None,
        })
    }
}
