//! Content fingerprinting and storage-key construction.
//!
//! Everything in this module is a pure function: the same inputs always
//! produce the same fingerprint, storage key, or URL. Durable placement is
//! derived entirely from content identity, so repeated computation never
//! disagrees with what a previous process instance wrote.

use crate::models::identity::OwnerId;
use sha2::{Digest, Sha256};

/// Namespace prefix for owner-scoped objects.
pub const UPLOADS_PREFIX: &str = "uploads";

/// Namespace prefix for objects readable without any owner context.
pub const PUBLIC_PREFIX: &str = "public";

/// Path prefix of the public view endpoint, embedded in returned URLs.
pub const VIEW_PATH: &str = "/api/v1/files/view";

const MAX_EXTENSION_LEN: usize = 8;

/// Compute the content fingerprint of a byte payload.
///
/// SHA-256, rendered as lowercase hex. Identical bytes always yield the
/// identical fingerprint; distinct fingerprints are treated as distinct
/// content everywhere else in the store.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Storage key for an owner-scoped object: `uploads/{owner}/{fp}.{ext}`.
pub fn owner_key(owner: &OwnerId, fingerprint: &str, ext: &str) -> String {
    format!("{UPLOADS_PREFIX}/{owner}/{fingerprint}.{ext}")
}

/// Storage key for a public object: `public/{fp}.{ext}`.
pub fn public_key(fingerprint: &str, ext: &str) -> String {
    format!("{PUBLIC_PREFIX}/{fingerprint}.{ext}")
}

/// Externally shareable view URL for a stored object.
///
/// The owner rides along as a `uid` query parameter. It is a hint for the
/// resolver's first lookup tier, not an authorization claim.
pub fn view_url(fingerprint: &str, ext: &str, owner: Option<&OwnerId>) -> String {
    match owner {
        Some(owner) => format!("{VIEW_PATH}/{fingerprint}.{ext}?uid={owner}"),
        None => format!("{VIEW_PATH}/{fingerprint}.{ext}"),
    }
}

/// Derive a normalized extension from a client-declared file name.
///
/// Lower-cases the segment after the final dot and strips anything outside
/// `[a-z0-9]`. Returns `None` when nothing usable remains, leaving the
/// caller to fall back on the validated content type.
pub fn normalize_extension(declared_name: &str) -> Option<String> {
    let (_, raw) = declared_name.rsplit_once('.')?;
    let ext: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    Some(ext)
}

/// Split a requested reference name into `(fingerprint, extension)`.
///
/// The split is on the final dot; a name with no extension, a non-hex
/// fingerprint, or a non-alphanumeric extension is malformed and never
/// reaches key construction.
pub fn split_reference(name: &str) -> Option<(&str, &str)> {
    let (fp, ext) = name.rsplit_once('.')?;
    if fp.is_empty() || !fp.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((fp, ext))
}
