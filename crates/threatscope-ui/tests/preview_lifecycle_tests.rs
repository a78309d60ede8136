//! Tests preview handle release on replace, clear and drop.

use std::sync::Arc;

use threatscope_core::StagedFile;
use threatscope_ui::{InMemoryPreviewBackend, PreviewResourceManager};

fn png(tag: &[u8]) -> StagedFile {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(tag);
    StagedFile::new("diagram.png", bytes).expect("png should stage")
}

#[test]
fn preview_lifecycle_tests_replace_releases_previous_handle() {
    let backend = Arc::new(InMemoryPreviewBackend::new());
    let mut manager = PreviewResourceManager::new(backend.clone());

    let first = manager.stage(&png(b"one")).clone();
    let second = manager.stage(&png(b"two")).clone();

    assert!(!backend.is_live(&first));
    assert!(backend.is_live(&second));
    assert_eq!(backend.outstanding(), 1);
    assert_eq!(manager.current(), Some(&second));
}

#[test]
fn preview_lifecycle_tests_clear_and_drop_release_everything() {
    let backend = Arc::new(InMemoryPreviewBackend::new());
    let mut manager = PreviewResourceManager::new(backend.clone());

    manager.stage(&png(b"one"));
    manager.clear();
    assert_eq!(backend.outstanding(), 0);
    assert!(manager.current().is_none());

    manager.clear();
    manager.stage(&png(b"two"));
    assert_eq!(backend.outstanding(), 1);

    drop(manager);
    assert_eq!(backend.outstanding(), 0);
}

#[test]
fn preview_lifecycle_tests_handles_never_contain_file_bytes() {
    let backend = Arc::new(InMemoryPreviewBackend::new());
    let mut manager = PreviewResourceManager::new(backend);

    let handle = manager.stage(&png(b"secret-architecture")).clone();
    assert!(handle.as_str().starts_with("preview:"));
    assert!(!handle.as_str().contains("secret"));
}
