//! Local preview handles for the staged diagram.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use threatscope_core::StagedFile;

const DIGEST_PREFIX_LEN: usize = 12;

/// Opaque reference to a locally rendered preview of staged bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    /// Handle text, shaped `preview:<digest>:<seq>`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Creates and releases preview handles.
pub trait PreviewBackend: Send + Sync {
    /// Allocates a handle for `file`.
    fn create(&self, file: &StagedFile) -> PreviewHandle;

    /// Releases `handle`. Returns `false` when it was not outstanding.
    fn release(&self, handle: &PreviewHandle) -> bool;
}

/// Preview backend that only tracks outstanding handles.
#[derive(Debug, Default)]
pub struct InMemoryPreviewBackend {
    next_seq: AtomicU64,
    live: Mutex<BTreeMap<PreviewHandle, usize>>,
}

impl InMemoryPreviewBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles created and not yet released.
    pub fn outstanding(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    /// Returns `true` when `handle` is still outstanding.
    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live
            .lock()
            .map(|live| live.contains_key(handle))
            .unwrap_or(false)
    }
}

impl PreviewBackend for InMemoryPreviewBackend {
    fn create(&self, file: &StagedFile) -> PreviewHandle {
        let digest = hex::encode(Sha256::digest(&file.bytes));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = PreviewHandle(format!("preview:{}:{seq}", &digest[..DIGEST_PREFIX_LEN]));

        if let Ok(mut live) = self.live.lock() {
            live.insert(handle.clone(), file.len());
        }
        handle
    }

    fn release(&self, handle: &PreviewHandle) -> bool {
        self.live
            .lock()
            .map(|mut live| live.remove(handle).is_some())
            .unwrap_or(false)
    }
}

/// Owns at most one preview handle at a time.
///
/// Replacing, clearing or dropping the manager releases the outstanding
/// handle through the backend.
pub struct PreviewResourceManager {
    backend: Arc<dyn PreviewBackend>,
    current: Option<PreviewHandle>,
}

impl std::fmt::Debug for PreviewResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewResourceManager")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl PreviewResourceManager {
    /// Creates a manager with no outstanding handle.
    pub fn new(backend: Arc<dyn PreviewBackend>) -> Self {
        Self {
            backend,
            current: None,
        }
    }

    /// Creates a handle for `file`, releasing the previous one first.
    pub fn stage(&mut self, file: &StagedFile) -> &PreviewHandle {
        self.clear();
        self.current.insert(self.backend.create(file))
    }

    /// Releases the outstanding handle, if any.
    pub fn clear(&mut self) {
        if let Some(previous) = self.current.take() {
            self.backend.release(&previous);
        }
    }

    /// Outstanding handle.
    pub fn current(&self) -> Option<&PreviewHandle> {
        self.current.as_ref()
    }
}

impl Drop for PreviewResourceManager {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_embeds_digest_prefix_and_sequence() {
        let backend = InMemoryPreviewBackend::new();
        let file = StagedFile::new("a.png", b"\x89PNG\r\n\x1a\nabc".to_vec()).expect("png");

        let first = backend.create(&file);
        let second = backend.create(&file);

        let parts: Vec<&str> = first.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "preview");
        assert_eq!(parts[1].len(), DIGEST_PREFIX_LEN);
        assert_eq!(parts[2], "1");
        assert!(second.as_str().ends_with(":2"));
        assert_ne!(first, second);
    }

    #[test]
    fn release_is_reported_once() {
        let backend = InMemoryPreviewBackend::new();
        let file = StagedFile::new("a.jpg", vec![0xff, 0xd8, 0xff]).expect("jpeg");
        let handle = backend.create(&file);

        assert!(backend.release(&handle));
        assert!(!backend.release(&handle));
        assert_eq!(backend.outstanding(), 0);
    }
}
