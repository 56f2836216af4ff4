//! Shared handler state

use propflow_storage::{Storage, UrlSigner};
use propflow_worker::MigrationControl;
use std::sync::Arc;

/// Serves locally stored objects behind signed URLs.
#[derive(Clone)]
pub struct MediaServing {
    pub storage: Arc<dyn Storage>,
    pub signer: UrlSigner,
}

pub struct AppState {
    pub control: Arc<MigrationControl>,
    /// Present only for the local filesystem backend. S3 presigns its own URLs
    /// and the memory backend's URLs are not meant to be fetched.
    pub media: Option<MediaServing>,
}
