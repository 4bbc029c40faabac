//! Response body returned by the upload endpoint.

use serde::{Deserialize, Serialize};

/// Stable reference handed back after an upload, whether the call wrote a
/// new object or reused an existing one.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    /// Shareable view path embedding the fingerprint, extension, and an
    /// owner hint query parameter.
    pub url: String,

    /// Lowercase hex SHA-256 of the uploaded bytes.
    pub fingerprint: String,
}
