//! Shared application state carried by the router.

use crate::services::{auth::IdentityVerifier, image_store::ImageStore};
use std::sync::Arc;

/// Everything a handler needs: the image store and the identity seam to
/// the authentication collaborator.
#[derive(Clone)]
pub struct AppState {
    pub images: ImageStore,
    pub auth: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(images: ImageStore, auth: Arc<dyn IdentityVerifier>) -> Self {
        Self { images, auth }
    }
}
